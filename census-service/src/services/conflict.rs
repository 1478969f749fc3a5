//! Fingerprint collision checks within one census.
//!
//! Fingerprints double as anonymous login credentials, so two participants
//! of the same census must never share one. Every check runs before the
//! corresponding write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::error::SyncError;
use super::metrics::record_fingerprint_conflicts;
use super::store::CensusStore;
use super::write_gate::with_deadline;
use crate::models::{Fingerprints, ParticipantConflict, ParticipantUpsert};

#[derive(Clone)]
pub struct ConflictDetector {
    store: Arc<dyn CensusStore>,
    query_timeout: Duration,
}

impl ConflictDetector {
    pub fn new(store: Arc<dyn CensusStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    /// Fail with [`SyncError::DuplicateFingerprint`] if another participant of
    /// `census_id` holds any of `fingerprints`.
    pub async fn ensure_unique(
        &self,
        census_id: &str,
        participant_id: &str,
        fingerprints: &Fingerprints,
    ) -> Result<(), SyncError> {
        let values = fingerprints.values();
        let count = with_deadline(
            "count_conflicting_participants",
            self.query_timeout,
            self.store
                .count_conflicting_participants(census_id, participant_id, &values),
        )
        .await?;

        if count == 0 {
            return Ok(());
        }

        let holders = with_deadline(
            "find_participants_by_fingerprints",
            self.query_timeout,
            self.store.find_participants_by_fingerprints(census_id, &values),
        )
        .await?;
        let conflicting_participant_id = holders
            .into_iter()
            .map(|p| p.participant_id)
            .find(|id| id != participant_id)
            .unwrap_or_default();

        tracing::warn!(
            census_id = %census_id,
            participant_id = %participant_id,
            conflicting_participant_id = %conflicting_participant_id,
            "Rejected participant update: duplicate fingerprint"
        );
        record_fingerprint_conflicts(census_id, 1);

        Err(SyncError::DuplicateFingerprint {
            census_id: census_id.to_string(),
            participant_id: participant_id.to_string(),
            conflicting_participant_id,
        })
    }

    /// Split a batch of participant upserts into accepted ones and conflicts.
    ///
    /// A candidate conflicts when a stored participant with a different id
    /// holds one of its fingerprints, or when an earlier accepted candidate
    /// of the same batch does. Input order is preserved; the earlier record wins.
    pub async fn partition_batch(
        &self,
        census_id: &str,
        candidates: Vec<ParticipantUpsert>,
    ) -> Result<(Vec<ParticipantUpsert>, Vec<ParticipantConflict>), SyncError> {
        let values: Vec<String> = candidates
            .iter()
            .flat_map(|c| c.fingerprints.values())
            .collect();

        let stored = with_deadline(
            "find_participants_by_fingerprints",
            self.query_timeout,
            self.store.find_participants_by_fingerprints(census_id, &values),
        )
        .await?;

        let mut owners: HashMap<String, String> = HashMap::new();
        for participant in &stored {
            for (_, value) in participant.fingerprints().iter() {
                owners.insert(value.to_string(), participant.participant_id.clone());
            }
        }

        let mut accepted = Vec::with_capacity(candidates.len());
        let mut conflicts = Vec::new();
        let mut claimed: HashMap<String, String> = HashMap::new();

        for candidate in candidates {
            let clash = candidate.fingerprints.iter().find_map(|(_, value)| {
                owners
                    .get(value)
                    .or_else(|| claimed.get(value))
                    .filter(|owner| **owner != candidate.participant_id)
                    .cloned()
            });

            match clash {
                Some(conflicting_participant_id) => {
                    conflicts.push(ParticipantConflict {
                        census_id: census_id.to_string(),
                        participant_id: candidate.participant_id.clone(),
                        conflicting_participant_id,
                    });
                }
                None => {
                    for (_, value) in candidate.fingerprints.iter() {
                        claimed.insert(value.to_string(), candidate.participant_id.clone());
                    }
                    accepted.push(candidate);
                }
            }
        }

        if !conflicts.is_empty() {
            tracing::warn!(
                census_id = %census_id,
                conflicts = conflicts.len(),
                "Skipped participants with duplicate fingerprints"
            );
            record_fingerprint_conflicts(census_id, conflicts.len() as u64);
        }

        Ok((accepted, conflicts))
    }
}
