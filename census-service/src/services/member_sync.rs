//! Edits that touch one member at a time, outside of a bulk job.

use secrecy::SecretString;

use super::context::{ensure_applied, SyncContext};
use super::error::SyncError;
use super::fingerprint::compute_fingerprints;
use super::metrics::{record_field_warnings, record_members_synced, record_participants_synced};
use crate::models::{FieldWarning, Fingerprints, Member, ParticipantUpsert, RawMember};

/// Result of a single-member upsert.
#[derive(Debug, Clone)]
pub struct MemberUpdate {
    pub member: Member,
    pub warnings: Vec<FieldWarning>,
    pub created: bool,
    /// Census ids whose participant fingerprints were refreshed.
    pub censuses: Vec<String>,
}

/// Outcome of a member deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedMembers {
    pub members: u64,
    pub participants: u64,
}

#[derive(Clone)]
pub struct MemberSync {
    ctx: SyncContext,
}

impl MemberSync {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Create or edit one member and refresh its participants in every census.
    ///
    /// All affected censuses are checked for fingerprint collisions before
    /// anything is written; one rejection aborts the whole edit and leaves
    /// both the member and its participants untouched.
    #[tracing::instrument(skip(self, salt, raw), fields(member_id = tracing::field::Empty))]
    pub async fn upsert_member(
        &self,
        org_id: &str,
        salt: &SecretString,
        raw: RawMember,
    ) -> Result<MemberUpdate, SyncError> {
        self.ctx.require_organization(org_id).await?;

        let prepared = self
            .ctx
            .prepare_members(org_id, salt, vec![raw])
            .await?
            .pop()
            .ok_or_else(|| SyncError::Internal(anyhow::anyhow!("member preparation produced no record")))?;
        let member_id = prepared.member().id.clone();
        tracing::Span::current().record("member_id", member_id.as_str());

        let participations = if prepared.is_new {
            Vec::new()
        } else {
            self.ctx
                .query(
                    "find_participants_by_member",
                    self.ctx.store.find_participants_by_member(&member_id),
                )
                .await?
        };

        let mut refreshed = Vec::with_capacity(participations.len());
        for participation in participations {
            let census = self
                .ctx
                .query(
                    "find_census",
                    self.ctx.store.find_census(&participation.census_id),
                )
                .await?;
            let Some(census) = census else {
                tracing::warn!(
                    census_id = %participation.census_id,
                    member_id = %member_id,
                    "Participant references a missing census, skipping"
                );
                continue;
            };
            let fingerprints = compute_fingerprints(&census, prepared.member())?;
            refreshed.push(ParticipantUpsert {
                participant_id: member_id.clone(),
                census_id: census.id,
                fingerprints,
            });
        }

        let _gate = self.ctx.gate.acquire().await;

        for upsert in &refreshed {
            self.ctx
                .conflicts
                .ensure_unique(&upsert.census_id, &upsert.participant_id, &upsert.fingerprints)
                .await?;
        }

        let summary = self
            .ctx
            .write(
                "upsert_members",
                self.ctx
                    .store
                    .upsert_members(org_id, std::slice::from_ref(&prepared.upsert)),
            )
            .await?;
        ensure_applied("upsert_members", &summary)?;
        record_members_synced(org_id, "member", summary.applied());

        for upsert in &refreshed {
            let summary = self
                .ctx
                .write(
                    "upsert_participants",
                    self.ctx
                        .store
                        .upsert_participants(&upsert.census_id, std::slice::from_ref(upsert)),
                )
                .await?;
            ensure_applied("upsert_participants", &summary)?;
            record_participants_synced(&upsert.census_id, summary.applied());
        }

        record_field_warnings(org_id, prepared.warnings.len() as u64);
        tracing::info!(
            member_id = %member_id,
            created = prepared.is_new,
            censuses = refreshed.len(),
            warnings = prepared.warnings.len(),
            "Member upserted"
        );

        Ok(MemberUpdate {
            member: prepared.upsert.member,
            warnings: prepared.warnings,
            created: prepared.is_new,
            censuses: refreshed.into_iter().map(|u| u.census_id).collect(),
        })
    }

    /// Make an existing member a participant of a census.
    #[tracing::instrument(skip(self))]
    pub async fn link_member_to_census(
        &self,
        org_id: &str,
        census_id: &str,
        member_id: &str,
    ) -> Result<Fingerprints, SyncError> {
        self.ctx.require_organization(org_id).await?;
        let census = self.ctx.require_census(org_id, census_id).await?;
        let member = self
            .ctx
            .query("find_member", self.ctx.store.find_member(org_id, member_id))
            .await?
            .ok_or_else(|| SyncError::not_found("member", member_id))?;

        let fingerprints = compute_fingerprints(&census, &member)?;
        let upsert = ParticipantUpsert {
            participant_id: member.id.clone(),
            census_id: census.id.clone(),
            fingerprints,
        };

        let _gate = self.ctx.gate.acquire().await;
        self.ctx
            .conflicts
            .ensure_unique(&census.id, &member.id, &upsert.fingerprints)
            .await?;
        let summary = self
            .ctx
            .write(
                "upsert_participants",
                self.ctx
                    .store
                    .upsert_participants(&census.id, std::slice::from_ref(&upsert)),
            )
            .await?;
        ensure_applied("upsert_participants", &summary)?;
        record_participants_synced(&census.id, summary.applied());

        tracing::info!(census_id = %census.id, member_id = %member.id, "Member linked to census");
        Ok(upsert.fingerprints)
    }

    /// Delete members of an organization together with their participant
    /// rows in every census.
    #[tracing::instrument(skip(self, member_ids), fields(count = member_ids.len()))]
    pub async fn delete_members(
        &self,
        org_id: &str,
        member_ids: &[String],
    ) -> Result<DeletedMembers, SyncError> {
        self.ctx.require_organization(org_id).await?;
        if member_ids.is_empty() {
            return Ok(DeletedMembers::default());
        }

        let owned: Vec<String> = self
            .ctx
            .query(
                "find_members",
                self.ctx.store.find_members(org_id, member_ids, &[]),
            )
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();
        if owned.is_empty() {
            return Ok(DeletedMembers::default());
        }

        let _gate = self.ctx.gate.acquire().await;
        let participants = self
            .ctx
            .write(
                "delete_participants_by_members",
                self.ctx.store.delete_participants_by_members(&owned),
            )
            .await?;
        let members = self
            .ctx
            .write(
                "delete_members",
                self.ctx.store.delete_members(org_id, &owned),
            )
            .await?;

        tracing::info!(members, participants, "Members deleted");
        Ok(DeletedMembers {
            members,
            participants,
        })
    }

    /// Unlink members from one census. The members themselves are kept.
    #[tracing::instrument(skip(self, member_ids), fields(count = member_ids.len()))]
    pub async fn remove_participants(
        &self,
        census_id: &str,
        member_ids: &[String],
    ) -> Result<u64, SyncError> {
        if census_id.trim().is_empty() {
            return Err(SyncError::InvalidInput("census id is required".to_string()));
        }
        self.ctx
            .query("find_census", self.ctx.store.find_census(census_id))
            .await?
            .ok_or_else(|| SyncError::not_found("census", census_id))?;
        if member_ids.is_empty() {
            return Ok(0);
        }

        let _gate = self.ctx.gate.acquire().await;
        let removed = self
            .ctx
            .write(
                "delete_participants",
                self.ctx.store.delete_participants(census_id, member_ids),
            )
            .await?;
        tracing::info!(census_id = %census_id, removed, "Participants removed");
        Ok(removed)
    }
}
