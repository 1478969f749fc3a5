use async_trait::async_trait;

use super::error::SyncError;
use crate::models::{
    Census, CensusParticipant, Member, MemberGroup, MemberUpsert, Organization, ParticipantUpsert,
};

/// Server code for a unique index violation.
pub const DUPLICATE_KEY: i32 = 11000;

/// One statement of a grouped write that the store rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    /// Position of the statement in the submitted slice.
    pub index: usize,
    pub code: i32,
    pub message: String,
}

impl WriteFailure {
    pub fn duplicate_key(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            code: DUPLICATE_KEY,
            message: message.into(),
        }
    }

    /// Re-submitting the same document fails the same way.
    pub fn is_duplicate_key(&self) -> bool {
        self.code == DUPLICATE_KEY
    }
}

impl std::fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "statement {}: {} (code {})",
            self.index, self.message, self.code
        )
    }
}

/// Result of a grouped write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
    /// Per-document failures reported by the store; the other documents were applied.
    pub errors: Vec<WriteFailure>,
}

impl WriteSummary {
    /// Documents actually inserted or changed.
    pub fn applied(&self) -> u64 {
        self.upserted + self.modified
    }

    /// Failure of the statement at `index`, if any.
    pub fn failure(&self, index: usize) -> Option<&WriteFailure> {
        self.errors.iter().find(|e| e.index == index)
    }
}

/// Persistence seam of the synchronization engine.
///
/// Lookups return `Ok(None)` for missing documents so callers can tell
/// "does not exist" apart from infrastructure failures.
#[async_trait]
pub trait CensusStore: Send + Sync {
    async fn find_organization(&self, org_id: &str) -> Result<Option<Organization>, SyncError>;

    async fn find_census(&self, census_id: &str) -> Result<Option<Census>, SyncError>;

    async fn find_group(&self, group_id: &str) -> Result<Option<MemberGroup>, SyncError>;

    async fn find_member(&self, org_id: &str, member_id: &str)
        -> Result<Option<Member>, SyncError>;

    /// Members of `org_id` whose id is in `ids` or whose member number is in `member_numbers`.
    async fn find_members(
        &self,
        org_id: &str,
        ids: &[String],
        member_numbers: &[String],
    ) -> Result<Vec<Member>, SyncError>;

    async fn upsert_members(
        &self,
        org_id: &str,
        upserts: &[MemberUpsert],
    ) -> Result<WriteSummary, SyncError>;

    async fn delete_members(&self, org_id: &str, ids: &[String]) -> Result<u64, SyncError>;

    async fn add_group_members(
        &self,
        group_id: &str,
        member_ids: &[String],
    ) -> Result<WriteSummary, SyncError>;

    async fn find_participant(
        &self,
        census_id: &str,
        participant_id: &str,
    ) -> Result<Option<CensusParticipant>, SyncError>;

    /// Every census participation of a member.
    async fn find_participants_by_member(
        &self,
        participant_id: &str,
    ) -> Result<Vec<CensusParticipant>, SyncError>;

    /// Participants of `census_id` holding any of `fingerprints` in any slot.
    async fn find_participants_by_fingerprints(
        &self,
        census_id: &str,
        fingerprints: &[String],
    ) -> Result<Vec<CensusParticipant>, SyncError>;

    /// Like [`find_participants_by_fingerprints`](Self::find_participants_by_fingerprints),
    /// excluding `participant_id`, counted.
    async fn count_conflicting_participants(
        &self,
        census_id: &str,
        participant_id: &str,
        fingerprints: &[String],
    ) -> Result<u64, SyncError>;

    async fn count_participants(&self, census_id: &str) -> Result<u64, SyncError>;

    async fn upsert_participants(
        &self,
        census_id: &str,
        upserts: &[ParticipantUpsert],
    ) -> Result<WriteSummary, SyncError>;

    async fn delete_participants(
        &self,
        census_id: &str,
        participant_ids: &[String],
    ) -> Result<u64, SyncError>;

    /// Remove participations of the given members from every census.
    async fn delete_participants_by_members(
        &self,
        participant_ids: &[String],
    ) -> Result<u64, SyncError>;
}
