//! In-process [`CensusStore`] with the same upsert and field-mask semantics
//! as [`CensusDb`](super::CensusDb), plus failure injection for tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;

use super::error::SyncError;
use super::store::{CensusStore, WriteFailure, WriteSummary};
use crate::models::{
    Census, CensusParticipant, FingerprintSlot, Member, MemberGroup, MemberUpsert, Organization,
    ParticipantUpsert,
};

#[derive(Default)]
struct Collections {
    organizations: HashMap<String, Organization>,
    censuses: HashMap<String, Census>,
    groups: HashMap<String, MemberGroup>,
    members: HashMap<String, Member>,
    /// Insertion ordered, keyed by (participant_id, census_id).
    participants: Vec<CensusParticipant>,
}

#[derive(Default)]
struct Faults {
    failing_member_ids: HashSet<String>,
    write_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Collections>,
    faults: RwLock<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_organization(&self, organization: Organization) {
        let mut data = self.data.write().await;
        data.organizations
            .insert(organization.id.clone(), organization);
    }

    pub async fn insert_census(&self, census: Census) {
        let mut data = self.data.write().await;
        data.censuses.insert(census.id.clone(), census);
    }

    pub async fn insert_group(&self, group: MemberGroup) {
        let mut data = self.data.write().await;
        data.groups.insert(group.id.clone(), group);
    }

    /// Members of an organization, sorted by id.
    pub async fn members(&self, org_id: &str) -> Vec<Member> {
        let data = self.data.read().await;
        let mut members: Vec<Member> = data
            .members
            .values()
            .filter(|m| m.org_id == org_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    pub async fn participants(&self, census_id: &str) -> Vec<CensusParticipant> {
        let data = self.data.read().await;
        data.participants
            .iter()
            .filter(|p| p.census_id == census_id)
            .cloned()
            .collect()
    }

    /// Grouped member writes containing `member_id` fail as if the store were down.
    pub async fn fail_member_writes_containing(&self, member_id: impl Into<String>) {
        self.faults
            .write()
            .await
            .failing_member_ids
            .insert(member_id.into());
    }

    pub async fn clear_faults(&self) {
        let mut faults = self.faults.write().await;
        faults.failing_member_ids.clear();
        faults.write_delay = None;
    }

    /// Sleep before every grouped write.
    pub async fn set_write_delay(&self, delay: Duration) {
        self.faults.write().await.write_delay = Some(delay);
    }

    async fn simulate_latency(&self) {
        let delay = self.faults.read().await.write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn shares_slot(a: &CensusParticipant, b: &ParticipantUpsert) -> bool {
    let stored = a.fingerprints();
    FingerprintSlot::ALL
        .iter()
        .any(|slot| matches!((stored.get(*slot), b.fingerprints.get(*slot)), (Some(x), Some(y)) if x == y))
}

fn holds_any(participant: &CensusParticipant, fingerprints: &[String]) -> bool {
    participant
        .fingerprints()
        .iter()
        .any(|(_, value)| fingerprints.iter().any(|f| f == value))
}

#[async_trait]
impl CensusStore for MemoryStore {
    async fn find_organization(&self, org_id: &str) -> Result<Option<Organization>, SyncError> {
        Ok(self.data.read().await.organizations.get(org_id).cloned())
    }

    async fn find_census(&self, census_id: &str) -> Result<Option<Census>, SyncError> {
        Ok(self.data.read().await.censuses.get(census_id).cloned())
    }

    async fn find_group(&self, group_id: &str) -> Result<Option<MemberGroup>, SyncError> {
        Ok(self.data.read().await.groups.get(group_id).cloned())
    }

    async fn find_member(
        &self,
        org_id: &str,
        member_id: &str,
    ) -> Result<Option<Member>, SyncError> {
        Ok(self
            .data
            .read()
            .await
            .members
            .get(member_id)
            .filter(|m| m.org_id == org_id)
            .cloned())
    }

    async fn find_members(
        &self,
        org_id: &str,
        ids: &[String],
        member_numbers: &[String],
    ) -> Result<Vec<Member>, SyncError> {
        let data = self.data.read().await;
        Ok(data
            .members
            .values()
            .filter(|m| m.org_id == org_id)
            .filter(|m| ids.contains(&m.id) || member_numbers.contains(&m.member_number))
            .cloned()
            .collect())
    }

    async fn upsert_members(
        &self,
        org_id: &str,
        upserts: &[MemberUpsert],
    ) -> Result<WriteSummary, SyncError> {
        self.simulate_latency().await;
        {
            let faults = self.faults.read().await;
            if let Some(failing) = upserts
                .iter()
                .find(|u| faults.failing_member_ids.contains(&u.member.id))
            {
                return Err(SyncError::WriteErrors(format!(
                    "simulated store outage writing member {}",
                    failing.member.id
                )));
            }
        }

        let mut guard = self.data.write().await;
        let data = &mut *guard;
        let mut summary = WriteSummary::default();
        for (index, upsert) in upserts.iter().enumerate() {
            let incoming = &upsert.member;
            match data.members.get_mut(&incoming.id) {
                Some(existing) if existing.org_id != org_id => {
                    summary.errors.push(WriteFailure::duplicate_key(
                        index,
                        format!("duplicate key {}", incoming.id),
                    ));
                }
                Some(existing) => {
                    existing.apply_fields(incoming, upsert.mask);
                    summary.matched += 1;
                    summary.modified += 1;
                }
                None => {
                    let mut member = Member {
                        id: incoming.id.clone(),
                        org_id: org_id.to_string(),
                        member_number: String::new(),
                        name: String::new(),
                        surname: String::new(),
                        national_id: String::new(),
                        email: String::new(),
                        hashed_phone: String::new(),
                        hashed_password: String::new(),
                        birth_date: String::new(),
                        parsed_birth_date: None,
                        other: HashMap::new(),
                        created_at: incoming.created_at,
                        updated_at: incoming.updated_at,
                    };
                    member.apply_fields(incoming, upsert.mask);
                    data.members.insert(member.id.clone(), member);
                    summary.upserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn delete_members(&self, org_id: &str, ids: &[String]) -> Result<u64, SyncError> {
        let mut data = self.data.write().await;
        let before = data.members.len();
        data.members
            .retain(|id, m| !(m.org_id == org_id && ids.contains(id)));
        Ok((before - data.members.len()) as u64)
    }

    async fn add_group_members(
        &self,
        group_id: &str,
        member_ids: &[String],
    ) -> Result<WriteSummary, SyncError> {
        self.simulate_latency().await;
        let mut data = self.data.write().await;
        let Some(group) = data.groups.get_mut(group_id) else {
            return Ok(WriteSummary::default());
        };
        let mut changed = false;
        for id in member_ids {
            if !group.member_ids.contains(id) {
                group.member_ids.push(id.clone());
                changed = true;
            }
        }
        group.updated_at = Utc::now();
        Ok(WriteSummary {
            matched: 1,
            modified: u64::from(changed),
            ..Default::default()
        })
    }

    async fn find_participant(
        &self,
        census_id: &str,
        participant_id: &str,
    ) -> Result<Option<CensusParticipant>, SyncError> {
        let data = self.data.read().await;
        Ok(data
            .participants
            .iter()
            .find(|p| p.census_id == census_id && p.participant_id == participant_id)
            .cloned())
    }

    async fn find_participants_by_member(
        &self,
        participant_id: &str,
    ) -> Result<Vec<CensusParticipant>, SyncError> {
        let data = self.data.read().await;
        Ok(data
            .participants
            .iter()
            .filter(|p| p.participant_id == participant_id)
            .cloned()
            .collect())
    }

    async fn find_participants_by_fingerprints(
        &self,
        census_id: &str,
        fingerprints: &[String],
    ) -> Result<Vec<CensusParticipant>, SyncError> {
        let data = self.data.read().await;
        Ok(data
            .participants
            .iter()
            .filter(|p| p.census_id == census_id && holds_any(p, fingerprints))
            .cloned()
            .collect())
    }

    async fn count_conflicting_participants(
        &self,
        census_id: &str,
        participant_id: &str,
        fingerprints: &[String],
    ) -> Result<u64, SyncError> {
        let data = self.data.read().await;
        Ok(data
            .participants
            .iter()
            .filter(|p| {
                p.census_id == census_id
                    && p.participant_id != participant_id
                    && holds_any(p, fingerprints)
            })
            .count() as u64)
    }

    async fn count_participants(&self, census_id: &str) -> Result<u64, SyncError> {
        let data = self.data.read().await;
        Ok(data
            .participants
            .iter()
            .filter(|p| p.census_id == census_id)
            .count() as u64)
    }

    async fn upsert_participants(
        &self,
        census_id: &str,
        upserts: &[ParticipantUpsert],
    ) -> Result<WriteSummary, SyncError> {
        self.simulate_latency().await;
        let mut guard = self.data.write().await;
        let data = &mut *guard;
        let mut summary = WriteSummary::default();
        let now = Utc::now();

        for (index, upsert) in upserts.iter().enumerate() {
            // unique (census_id, slot) indexes
            let violates = data.participants.iter().any(|p| {
                p.census_id == census_id
                    && p.participant_id != upsert.participant_id
                    && shares_slot(p, upsert)
            });
            if violates {
                summary.errors.push(WriteFailure::duplicate_key(
                    index,
                    format!("duplicate fingerprint for participant {}", upsert.participant_id),
                ));
                continue;
            }

            let fp = &upsert.fingerprints;
            match data.participants.iter_mut().find(|p| {
                p.census_id == census_id && p.participant_id == upsert.participant_id
            }) {
                Some(existing) => {
                    existing.login_hash = fp.primary.clone();
                    existing.login_hash_email = fp.email.clone();
                    existing.login_hash_phone = fp.phone.clone();
                    existing.updated_at = now;
                    summary.matched += 1;
                    summary.modified += 1;
                }
                None => {
                    data.participants.push(CensusParticipant {
                        id: None,
                        participant_id: upsert.participant_id.clone(),
                        census_id: census_id.to_string(),
                        login_hash: fp.primary.clone(),
                        login_hash_email: fp.email.clone(),
                        login_hash_phone: fp.phone.clone(),
                        created_at: now,
                        updated_at: now,
                    });
                    summary.upserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn delete_participants(
        &self,
        census_id: &str,
        participant_ids: &[String],
    ) -> Result<u64, SyncError> {
        let mut data = self.data.write().await;
        let before = data.participants.len();
        data.participants
            .retain(|p| !(p.census_id == census_id && participant_ids.contains(&p.participant_id)));
        Ok((before - data.participants.len()) as u64)
    }

    async fn delete_participants_by_members(
        &self,
        participant_ids: &[String],
    ) -> Result<u64, SyncError> {
        let mut data = self.data.write().await;
        let before = data.participants.len();
        data.participants
            .retain(|p| !participant_ids.contains(&p.participant_id));
        Ok((before - data.participants.len()) as u64)
    }
}
