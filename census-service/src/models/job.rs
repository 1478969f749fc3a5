use serde::Serialize;

use super::member::MemberField;

/// Progress snapshot of a bulk job at the emitting instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkJobStatus {
    pub processed: usize,
    pub total: usize,
    pub added: usize,
    /// Set on the terminal snapshot of a cancelled job.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl BulkJobStatus {
    /// Completion ratio in percent, 100 for an empty job.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }

    pub fn is_complete(&self) -> bool {
        self.processed == self.total
    }
}

/// Non-fatal normalisation failure of a single member field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldWarning {
    pub member_id: String,
    pub field: String,
    pub reason: String,
}

impl FieldWarning {
    pub fn new(member_id: &str, field: MemberField, reason: impl Into<String>) -> Self {
        Self {
            member_id: member_id.to_string(),
            field: field.as_str().to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "member {}: {}: {}", self.member_id, self.field, self.reason)
    }
}

/// Participant write skipped because its fingerprints collide with another participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantConflict {
    pub census_id: String,
    pub participant_id: String,
    pub conflicting_participant_id: String,
}

/// Failure of one chunk's writes. The job continued with the next chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkError {
    pub chunk: usize,
    pub first_member_id: String,
    pub last_member_id: String,
    pub error: String,
    pub retryable: bool,
}

/// Single record the store refused while the rest of its chunk was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub member_id: String,
    pub operation: String,
    pub error: String,
    pub retryable: bool,
}

/// Outcome of a bulk job once the engine has finished.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub processed: usize,
    pub added: usize,
    pub participants: usize,
    pub warnings: Vec<FieldWarning>,
    pub conflicts: Vec<ParticipantConflict>,
    pub failed_records: Vec<RecordFailure>,
    pub chunk_errors: Vec<ChunkError>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} added, {} warnings, {} conflicts, {} failed records, {} failed chunks",
            self.added,
            self.total,
            self.warnings.len(),
            self.conflicts.len(),
            self.failed_records.len(),
            self.chunk_errors.len()
        )
    }
}
