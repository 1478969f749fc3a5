use chrono::Utc;
use secrecy::SecretString;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::conflict::ConflictDetector;
use super::error::SyncError;
use super::fingerprint::validate_census_fields;
use super::password::{HmacPasswordHasher, PasswordHasher};
use super::sanitizer::FieldSanitizer;
use super::store::{CensusStore, WriteFailure, WriteSummary};
use super::write_gate::{with_deadline, WriteGate};
use crate::config::SyncSettings;
use crate::models::{
    Census, FieldWarning, Member, MemberGroup, MemberUpsert, Organization, RawMember,
};

/// A sanitized member merged with its stored state, ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedMember {
    pub upsert: MemberUpsert,
    pub warnings: Vec<FieldWarning>,
    /// No member with this id existed before the write.
    pub is_new: bool,
}

impl PreparedMember {
    pub fn member(&self) -> &Member {
        &self.upsert.member
    }
}

/// Collaborators shared by the bulk engine and the single-member path.
#[derive(Clone)]
pub struct SyncContext {
    pub(crate) store: Arc<dyn CensusStore>,
    pub(crate) settings: SyncSettings,
    pub(crate) gate: WriteGate,
    pub(crate) sanitizer: FieldSanitizer,
    pub(crate) conflicts: ConflictDetector,
}

impl SyncContext {
    pub fn new(store: Arc<dyn CensusStore>, settings: SyncSettings) -> Self {
        let sanitizer = FieldSanitizer::new(&settings.phone_region, Arc::new(HmacPasswordHasher));
        let conflicts = ConflictDetector::new(store.clone(), settings.query_timeout);
        Self {
            store,
            settings,
            gate: WriteGate::global(),
            sanitizer,
            conflicts,
        }
    }

    pub fn with_password_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.sanitizer = FieldSanitizer::new(&self.settings.phone_region, hasher);
        self
    }

    /// Replace the process-wide write gate, e.g. to isolate tests.
    pub fn with_write_gate(mut self, gate: WriteGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub(crate) async fn query<T, F>(&self, operation: &'static str, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        with_deadline(operation, self.settings.query_timeout, fut).await
    }

    pub(crate) async fn write<T, F>(&self, operation: &'static str, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SyncError>>,
    {
        with_deadline(operation, self.settings.write_timeout, fut).await
    }

    pub(crate) async fn require_organization(
        &self,
        org_id: &str,
    ) -> Result<Organization, SyncError> {
        require_id("organization", org_id)?;
        self.query("find_organization", self.store.find_organization(org_id))
            .await?
            .ok_or_else(|| SyncError::not_found("organization", org_id))
    }

    /// Census owned by `org_id` with a usable field configuration.
    pub(crate) async fn require_census(
        &self,
        org_id: &str,
        census_id: &str,
    ) -> Result<Census, SyncError> {
        require_id("census", census_id)?;
        let census = self
            .query("find_census", self.store.find_census(census_id))
            .await?
            .filter(|census| census.org_id == org_id)
            .ok_or_else(|| SyncError::not_found("census", census_id))?;
        validate_census_fields(&census)?;
        Ok(census)
    }

    pub(crate) async fn require_group(
        &self,
        org_id: &str,
        group_id: &str,
    ) -> Result<MemberGroup, SyncError> {
        require_id("group", group_id)?;
        self.query("find_group", self.store.find_group(group_id))
            .await?
            .filter(|group| group.org_id == org_id)
            .ok_or_else(|| SyncError::not_found("group", group_id))
    }

    /// Give id-less records the identity of the stored member with the same
    /// member number, and return every stored member the batch refers to.
    ///
    /// Records sharing a member number that is not stored yet share one
    /// freshly minted id; the later record wins on write.
    pub(crate) async fn resolve_identities(
        &self,
        org_id: &str,
        raws: &mut [RawMember],
    ) -> Result<HashMap<String, Member>, SyncError> {
        let ids: Vec<String> = raws.iter().filter_map(explicit_id).collect();
        let numbers: Vec<String> = raws
            .iter()
            .filter(|raw| explicit_id(raw).is_none())
            .map(|raw| raw.member_number.trim().to_string())
            .filter(|number| !number.is_empty())
            .collect();

        if ids.is_empty() && numbers.is_empty() {
            return Ok(HashMap::new());
        }

        let stored = self
            .query(
                "find_members",
                self.store.find_members(org_id, &ids, &numbers),
            )
            .await?;

        let mut by_number: HashMap<String, String> = HashMap::new();
        for member in &stored {
            if member.member_number.is_empty() {
                continue;
            }
            by_number
                .entry(member.member_number.clone())
                .and_modify(|id| {
                    if member.id < *id {
                        *id = member.id.clone();
                    }
                })
                .or_insert_with(|| member.id.clone());
        }

        for raw in raws.iter_mut() {
            if let Some(id) = explicit_id(raw) {
                raw.id = Some(id);
                continue;
            }
            let number = raw.member_number.trim();
            if number.is_empty() {
                continue;
            }
            let id = by_number
                .entry(number.to_string())
                .or_insert_with(|| uuid::Uuid::new_v4().to_string())
                .clone();
            raw.id = Some(id);
        }

        Ok(stored.into_iter().map(|m| (m.id.clone(), m)).collect())
    }

    /// Resolve, sanitize and merge a batch of raw records, preserving input order.
    pub(crate) async fn prepare_members(
        &self,
        org_id: &str,
        salt: &SecretString,
        mut raws: Vec<RawMember>,
    ) -> Result<Vec<PreparedMember>, SyncError> {
        let stored = self.resolve_identities(org_id, &mut raws).await?;
        let now = Utc::now();

        raws.into_iter()
            .map(|raw| {
                let sanitized = self.sanitizer.sanitize(raw, org_id, salt, now)?;
                let mut member = sanitized.member;
                let existing = stored.get(&member.id);
                if let Some(existing) = existing {
                    member.merge_preserved(existing, sanitized.mask);
                }
                Ok(PreparedMember {
                    is_new: existing.is_none(),
                    upsert: MemberUpsert {
                        member,
                        mask: sanitized.mask,
                    },
                    warnings: sanitized.warnings,
                })
            })
            .collect()
    }
}

fn explicit_id(raw: &RawMember) -> Option<String> {
    raw.id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn require_id(entity: &str, id: &str) -> Result<(), SyncError> {
    if id.trim().is_empty() {
        return Err(SyncError::InvalidInput(format!("{entity} id is required")));
    }
    Ok(())
}

/// Fail on per-document errors of a grouped write.
pub(crate) fn ensure_applied(
    operation: &str,
    summary: &WriteSummary,
) -> Result<(), SyncError> {
    if summary.errors.is_empty() {
        return Ok(());
    }
    let message = format!(
        "{operation}: {}",
        summary
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    );
    if summary.errors.iter().all(WriteFailure::is_duplicate_key) {
        return Err(SyncError::DuplicateKey(message));
    }
    Err(SyncError::WriteErrors(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_only_failures_are_not_retryable() {
        let summary = WriteSummary {
            upserted: 1,
            errors: vec![WriteFailure::duplicate_key(1, "duplicate key taken")],
            ..Default::default()
        };
        let err = ensure_applied("upsert_members", &summary).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateKey(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_mixed_failures_stay_retryable() {
        let summary = WriteSummary {
            errors: vec![
                WriteFailure::duplicate_key(0, "duplicate key a"),
                WriteFailure {
                    index: 1,
                    code: 91,
                    message: "shutdown in progress".to_string(),
                },
            ],
            ..Default::default()
        };
        let err = ensure_applied("upsert_members", &summary).unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("statement 1: shutdown in progress (code 91)"));
        assert!(ensure_applied("upsert_members", &WriteSummary::default()).is_ok());
    }
}
