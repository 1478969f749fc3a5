use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid census configuration: {0}")]
    InvalidCensusConfig(String),

    #[error(
        "Update would create duplicate fingerprint in census {census_id}: participant {participant_id} collides with {conflicting_participant_id}"
    )]
    DuplicateFingerprint {
        census_id: String,
        participant_id: String,
        conflicting_participant_id: String,
    },

    #[error("{operation} exceeded its {after:?} deadline")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Write errors: {0}")]
    WriteErrors(String),

    /// Unique index violation; the same input is rejected again on retry.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Infrastructure failures; re-submitting the same input is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout { .. } | SyncError::Database(_) | SyncError::WriteErrors(_)
        )
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            e @ SyncError::NotFound { .. } => AppError::BadRequest(anyhow::anyhow!(e.to_string())),
            SyncError::InvalidCensusConfig(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            e @ SyncError::DuplicateFingerprint { .. } => {
                AppError::Conflict(anyhow::anyhow!(e.to_string()))
            }
            e @ SyncError::Timeout { .. } => AppError::ServiceUnavailable(e.to_string()),
            SyncError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            SyncError::WriteErrors(msg) => AppError::DatabaseError(anyhow::anyhow!(msg)),
            SyncError::DuplicateKey(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            SyncError::Internal(e) => AppError::InternalError(e),
        }
    }
}
