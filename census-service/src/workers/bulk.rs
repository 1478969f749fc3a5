//! Chunked bulk synchronization of members and census participants.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::progress::{JobCounters, ProgressReporter};
use crate::models::{
    BulkJobStatus, Census, ChunkError, FieldWarning, Member, MemberGroup, ParticipantConflict,
    ParticipantUpsert, RawMember, RecordFailure, SyncReport,
};
use crate::services::context::{ensure_applied, PreparedMember, SyncContext};
use crate::services::fingerprint::compute_fingerprints;
use crate::services::metrics::{
    record_chunk_failure, record_field_warnings, record_members_synced,
    record_participants_synced,
};
use crate::services::{SyncError, WriteSummary};

/// Where a bulk import lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    /// Members only.
    MemberPool,
    /// Members plus one participant per member in the census.
    Census(String),
    /// Members plus membership of the group.
    Group(String),
}

impl SyncTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncTarget::MemberPool => "member_pool",
            SyncTarget::Census(_) => "census",
            SyncTarget::Group(_) => "group",
        }
    }
}

/// Handle to a running bulk job.
pub struct BulkJob {
    total: usize,
    progress: mpsc::Receiver<BulkJobStatus>,
    handle: Option<JoinHandle<SyncReport>>,
    cancel: CancellationToken,
}

impl BulkJob {
    /// Job over no records: the progress stream is already closed.
    fn empty() -> Self {
        let (_, progress) = mpsc::channel(1);
        Self {
            total: 0,
            progress,
            handle: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Next progress snapshot, or `None` once the stream is closed.
    pub async fn next_status(&mut self) -> Option<BulkJobStatus> {
        self.progress.recv().await
    }

    /// Stop before the next chunk. The chunk in flight completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the engine, discarding any progress not yet consumed.
    pub async fn wait(self) -> Result<SyncReport, SyncError> {
        let (_, handle) = self.split();
        handle.wait().await
    }

    /// Separate the progress stream from the completion handle.
    pub fn split(self) -> (ReceiverStream<BulkJobStatus>, BulkJobHandle) {
        (
            ReceiverStream::new(self.progress),
            BulkJobHandle {
                handle: self.handle,
                cancel: self.cancel,
            },
        )
    }
}

pub struct BulkJobHandle {
    handle: Option<JoinHandle<SyncReport>>,
    cancel: CancellationToken,
}

impl BulkJobHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<SyncReport, SyncError> {
        match self.handle {
            Some(handle) => handle
                .await
                .map_err(|e| SyncError::Internal(anyhow::anyhow!("bulk job task failed: {e}"))),
            None => Ok(SyncReport::empty()),
        }
    }
}

/// Work done by one chunk, kept even when the chunk fails halfway.
#[derive(Debug, Default)]
struct ChunkOutcome {
    added: usize,
    participants: usize,
    warnings: Vec<FieldWarning>,
    conflicts: Vec<ParticipantConflict>,
    failures: Vec<RecordFailure>,
}

impl ChunkOutcome {
    /// Report refused statements of a grouped write one record at a time.
    /// `ids` lists the submitted records in statement order; the refused ones are returned.
    fn record_failures<'a>(
        &mut self,
        operation: &str,
        summary: &WriteSummary,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> HashSet<String> {
        let mut failed = HashSet::new();
        for (index, id) in ids.into_iter().enumerate() {
            let Some(failure) = summary.failure(index) else {
                continue;
            };
            tracing::warn!(
                member_id = %id,
                operation,
                error = %failure,
                "Record rejected by the store"
            );
            self.failures.push(RecordFailure {
                member_id: id.to_string(),
                operation: operation.to_string(),
                error: failure.to_string(),
                retryable: !failure.is_duplicate_key(),
            });
            failed.insert(id.to_string());
        }
        failed
    }
}

#[async_trait]
trait ChunkProcessor: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Identity used in chunk diagnostics.
    fn label(item: &Self::Item) -> String;

    async fn process(
        &self,
        chunk: Vec<Self::Item>,
        outcome: &mut ChunkOutcome,
    ) -> Result<(), SyncError>;
}

enum ResolvedTarget {
    MemberPool,
    Census(Census),
    Group(MemberGroup),
}

struct MemberImport {
    ctx: SyncContext,
    org_id: String,
    salt: SecretString,
    target: ResolvedTarget,
}

impl MemberImport {
    fn target_kind(&self) -> &'static str {
        match self.target {
            ResolvedTarget::MemberPool => "member_pool",
            ResolvedTarget::Census(_) => "census",
            ResolvedTarget::Group(_) => "group",
        }
    }

    /// Returns the ids the store refused; the rest of the chunk is written.
    async fn write_members(
        &self,
        prepared: &[PreparedMember],
        outcome: &mut ChunkOutcome,
    ) -> Result<HashSet<String>, SyncError> {
        if prepared.is_empty() {
            return Ok(HashSet::new());
        }
        let upserts: Vec<_> = prepared.iter().map(|p| p.upsert.clone()).collect();
        let summary = self
            .ctx
            .write(
                "upsert_members",
                self.ctx.store.upsert_members(&self.org_id, &upserts),
            )
            .await?;
        outcome.added += summary.applied() as usize;
        record_members_synced(&self.org_id, self.target_kind(), summary.applied());
        Ok(outcome.record_failures(
            "upsert_members",
            &summary,
            prepared.iter().map(|p| p.member().id.as_str()),
        ))
    }
}

#[async_trait]
impl ChunkProcessor for MemberImport {
    type Item = RawMember;

    fn label(item: &RawMember) -> String {
        item.id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| Some(item.member_number.trim().to_string()).filter(|n| !n.is_empty()))
            .unwrap_or_else(|| "<unassigned>".to_string())
    }

    async fn process(
        &self,
        chunk: Vec<RawMember>,
        outcome: &mut ChunkOutcome,
    ) -> Result<(), SyncError> {
        let prepared = self
            .ctx
            .prepare_members(&self.org_id, &self.salt, chunk)
            .await?;
        for member in &prepared {
            outcome.warnings.extend(member.warnings.iter().cloned());
        }
        record_field_warnings(&self.org_id, outcome.warnings.len() as u64);
        let prepared = last_write_wins(prepared);

        match &self.target {
            ResolvedTarget::MemberPool => {
                let _gate = self.ctx.gate.acquire().await;
                self.write_members(&prepared, outcome).await.map(|_| ())
            }
            ResolvedTarget::Group(group) => {
                let _gate = self.ctx.gate.acquire().await;
                let failed = self.write_members(&prepared, outcome).await?;
                let ids: Vec<String> = prepared
                    .iter()
                    .map(|p| p.member().id.clone())
                    .filter(|id| !failed.contains(id))
                    .collect();
                if ids.is_empty() {
                    return Ok(());
                }
                let summary = self
                    .ctx
                    .write(
                        "add_group_members",
                        self.ctx.store.add_group_members(&group.id, &ids),
                    )
                    .await?;
                ensure_applied("add_group_members", &summary)
            }
            ResolvedTarget::Census(census) => {
                let candidates = prepared
                    .iter()
                    .map(|p| participant_upsert(census, p.member()))
                    .collect::<Result<Vec<_>, _>>()?;

                let _gate = self.ctx.gate.acquire().await;
                let (accepted, conflicts) = self
                    .ctx
                    .conflicts
                    .partition_batch(&census.id, candidates)
                    .await?;

                // A rejected participant leaves its member untouched as well.
                let rejected: Vec<&str> = conflicts
                    .iter()
                    .map(|c| c.participant_id.as_str())
                    .collect();
                let writable: Vec<PreparedMember> = prepared
                    .into_iter()
                    .filter(|p| !rejected.contains(&p.member().id.as_str()))
                    .collect();
                outcome.conflicts.extend(conflicts);

                let failed = self.write_members(&writable, outcome).await?;

                // No participant for a member the store refused.
                let accepted: Vec<ParticipantUpsert> = accepted
                    .into_iter()
                    .filter(|u| !failed.contains(&u.participant_id))
                    .collect();
                if accepted.is_empty() {
                    return Ok(());
                }
                let summary = self
                    .ctx
                    .write(
                        "upsert_participants",
                        self.ctx.store.upsert_participants(&census.id, &accepted),
                    )
                    .await?;
                outcome.participants += summary.applied() as usize;
                record_participants_synced(&census.id, summary.applied());
                outcome.record_failures(
                    "upsert_participants",
                    &summary,
                    accepted.iter().map(|u| u.participant_id.as_str()),
                );
                Ok(())
            }
        }
    }
}

/// Participants for existing group members, without touching the members.
struct GroupPublication {
    ctx: SyncContext,
    org_id: String,
    census: Census,
}

#[async_trait]
impl ChunkProcessor for GroupPublication {
    type Item = String;

    fn label(item: &String) -> String {
        item.clone()
    }

    async fn process(
        &self,
        chunk: Vec<String>,
        outcome: &mut ChunkOutcome,
    ) -> Result<(), SyncError> {
        let members = self
            .ctx
            .query(
                "find_members",
                self.ctx.store.find_members(&self.org_id, &chunk, &[]),
            )
            .await?;
        if members.len() < chunk.len() {
            tracing::debug!(
                group_members = chunk.len(),
                found = members.len(),
                "Some group members no longer exist"
            );
        }

        // Keep group order for deterministic conflict resolution.
        let mut ordered: Vec<&Member> = Vec::with_capacity(members.len());
        for id in &chunk {
            if let Some(member) = members.iter().find(|m| &m.id == id) {
                ordered.push(member);
            }
        }
        let candidates = ordered
            .into_iter()
            .map(|member| participant_upsert(&self.census, member))
            .collect::<Result<Vec<_>, _>>()?;

        let _gate = self.ctx.gate.acquire().await;
        let (accepted, conflicts) = self
            .ctx
            .conflicts
            .partition_batch(&self.census.id, candidates)
            .await?;
        outcome.conflicts.extend(conflicts);
        if accepted.is_empty() {
            return Ok(());
        }

        let summary = self
            .ctx
            .write(
                "upsert_participants",
                self.ctx.store.upsert_participants(&self.census.id, &accepted),
            )
            .await?;
        outcome.added += summary.upserted as usize;
        outcome.participants += summary.applied() as usize;
        record_participants_synced(&self.census.id, summary.applied());
        outcome.record_failures(
            "upsert_participants",
            &summary,
            accepted.iter().map(|u| u.participant_id.as_str()),
        );
        Ok(())
    }
}

/// Collapse records resolving to the same member, keeping the last one.
/// Grouped writes are unordered, so one statement per member per chunk.
fn last_write_wins(prepared: Vec<PreparedMember>) -> Vec<PreparedMember> {
    let mut seen = HashSet::new();
    let mut unique: Vec<PreparedMember> = prepared
        .into_iter()
        .rev()
        .filter(|p| seen.insert(p.member().id.clone()))
        .collect();
    unique.reverse();
    unique
}

fn participant_upsert(census: &Census, member: &Member) -> Result<ParticipantUpsert, SyncError> {
    Ok(ParticipantUpsert {
        participant_id: member.id.clone(),
        census_id: census.id.clone(),
        fingerprints: compute_fingerprints(census, member)?,
    })
}

/// Starts bulk jobs over a shared [`SyncContext`].
#[derive(Clone)]
pub struct BulkSyncEngine {
    ctx: SyncContext,
}

impl BulkSyncEngine {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Validate preconditions and start importing `members` into `target`.
    ///
    /// `Err` is only returned for precondition failures. Once a job is
    /// returned, every later failure is reported per chunk in the
    /// [`SyncReport`]. An empty member list is a no-op job whose progress
    /// stream is already closed.
    #[tracing::instrument(
        skip(self, salt, target, members),
        fields(target = target.kind(), total = members.len())
    )]
    pub async fn start_bulk_sync(
        &self,
        org_id: &str,
        salt: &SecretString,
        target: SyncTarget,
        members: Vec<RawMember>,
    ) -> Result<BulkJob, SyncError> {
        if org_id.trim().is_empty() {
            return Err(SyncError::InvalidInput("organization id is required".to_string()));
        }
        match &target {
            SyncTarget::Census(id) | SyncTarget::Group(id) if id.trim().is_empty() => {
                return Err(SyncError::InvalidInput(format!(
                    "{} id is required",
                    target.kind()
                )));
            }
            _ => {}
        }
        if members.is_empty() {
            tracing::info!("Empty member list, nothing to sync");
            return Ok(BulkJob::empty());
        }

        self.ctx.require_organization(org_id).await?;
        let resolved = match &target {
            SyncTarget::MemberPool => ResolvedTarget::MemberPool,
            SyncTarget::Census(id) => ResolvedTarget::Census(self.ctx.require_census(org_id, id).await?),
            SyncTarget::Group(id) => ResolvedTarget::Group(self.ctx.require_group(org_id, id).await?),
        };

        let processor = MemberImport {
            ctx: self.ctx.clone(),
            org_id: org_id.to_string(),
            salt: salt.clone(),
            target: resolved,
        };
        let span = tracing::info_span!("bulk_sync", org_id = %org_id, target = target.kind());
        Ok(self.spawn_job(org_id, processor, members, span))
    }

    /// Create participants in `census_id` for every member of `group_id`.
    #[tracing::instrument(skip(self))]
    pub async fn publish_group_to_census(
        &self,
        org_id: &str,
        census_id: &str,
        group_id: &str,
    ) -> Result<BulkJob, SyncError> {
        self.ctx.require_organization(org_id).await?;
        let census = self.ctx.require_census(org_id, census_id).await?;
        let group = self.ctx.require_group(org_id, group_id).await?;

        if group.member_ids.is_empty() {
            tracing::info!("Group has no members, nothing to publish");
            return Ok(BulkJob::empty());
        }

        let processor = GroupPublication {
            ctx: self.ctx.clone(),
            org_id: org_id.to_string(),
            census,
        };
        let span = tracing::info_span!(
            "publish_group",
            org_id = %org_id,
            census_id = %census_id,
            group_id = %group_id
        );
        Ok(self.spawn_job(org_id, processor, group.member_ids, span))
    }

    fn spawn_job<P: ChunkProcessor>(
        &self,
        org_id: &str,
        processor: P,
        items: Vec<P::Item>,
        span: tracing::Span,
    ) -> BulkJob {
        let total = items.len();
        let settings = self.ctx.settings();
        let (tx, progress) = mpsc::channel(settings.progress_capacity.max(1));
        let counters = Arc::new(JobCounters::new(total));
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();

        ProgressReporter::new(counters.clone(), settings.progress_interval, tx, done.clone())
            .spawn();

        let run = JobRun {
            org_id: org_id.to_string(),
            batch_size: settings.batch_size.max(1),
            counters,
            cancel: cancel.clone(),
            done,
        };
        let handle = tokio::spawn(run.drive(processor, items).instrument(span));

        BulkJob {
            total,
            progress,
            handle: Some(handle),
            cancel,
        }
    }
}

struct JobRun {
    org_id: String,
    batch_size: usize,
    counters: Arc<JobCounters>,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl JobRun {
    async fn drive<P: ChunkProcessor>(self, processor: P, items: Vec<P::Item>) -> SyncReport {
        // Fires on every exit path, closing the progress stream.
        let _done = self.done.clone().drop_guard();

        let total = items.len();
        let mut report = SyncReport {
            total,
            ..SyncReport::default()
        };
        tracing::info!(total, batch_size = self.batch_size, "Bulk job started");

        let mut remaining = items.into_iter();
        let mut index = 0;
        loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                self.counters.mark_cancelled();
                tracing::warn!(
                    processed = report.processed,
                    total,
                    "Bulk job cancelled"
                );
                break;
            }

            let chunk: Vec<P::Item> = remaining.by_ref().take(self.batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            let size = chunk.len();
            let first = chunk.first().map(P::label).unwrap_or_default();
            let last = chunk.last().map(P::label).unwrap_or_default();

            let mut outcome = ChunkOutcome::default();
            let result = processor.process(chunk, &mut outcome).await;

            if let Err(err) = result {
                let retryable = err.is_retryable();
                tracing::error!(
                    chunk = index,
                    first_member_id = %first,
                    last_member_id = %last,
                    retryable,
                    error = %err,
                    "Chunk failed, continuing with the next one"
                );
                record_chunk_failure(&self.org_id, retryable);
                report.chunk_errors.push(ChunkError {
                    chunk: index,
                    first_member_id: first,
                    last_member_id: last,
                    error: err.to_string(),
                    retryable,
                });
            }

            report.processed += size;
            report.added += outcome.added;
            report.participants += outcome.participants;
            report.warnings.extend(outcome.warnings);
            report.conflicts.extend(outcome.conflicts);
            report.failed_records.extend(outcome.failures);
            self.counters.record_chunk(size, outcome.added);
            index += 1;
        }

        tracing::info!(summary = %report.summary(), "Bulk job finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MemberFieldMask, MemberUpsert};
    use chrono::Utc;
    use std::collections::HashMap;

    fn prepared(id: &str, name: &str) -> PreparedMember {
        let now = Utc::now();
        PreparedMember {
            upsert: MemberUpsert {
                member: Member {
                    id: id.to_string(),
                    org_id: "org".to_string(),
                    member_number: String::new(),
                    name: name.to_string(),
                    surname: String::new(),
                    national_id: String::new(),
                    email: String::new(),
                    hashed_phone: String::new(),
                    hashed_password: String::new(),
                    birth_date: String::new(),
                    parsed_birth_date: None,
                    other: HashMap::new(),
                    created_at: now,
                    updated_at: now,
                },
                mask: MemberFieldMask::profile(),
            },
            warnings: Vec::new(),
            is_new: true,
        }
    }

    #[test]
    fn test_last_record_per_member_wins() {
        let unique = last_write_wins(vec![
            prepared("a", "first"),
            prepared("b", "only"),
            prepared("a", "second"),
        ]);
        let names: Vec<_> = unique
            .iter()
            .map(|p| (p.member().id.as_str(), p.member().name.as_str()))
            .collect();
        assert_eq!(names, vec![("b", "only"), ("a", "second")]);
    }

    #[test]
    fn test_import_label_falls_back_to_member_number() {
        let with_id = RawMember::default().with_id("m-1");
        assert_eq!(MemberImport::label(&with_id), "m-1");

        let numbered = RawMember {
            member_number: " 0042 ".to_string(),
            ..RawMember::default()
        };
        assert_eq!(MemberImport::label(&numbered), "0042");
        assert_eq!(MemberImport::label(&RawMember::default()), "<unassigned>");
    }

    #[tokio::test]
    async fn test_empty_job_has_closed_stream() {
        let mut job = BulkJob::empty();
        assert_eq!(job.total(), 0);
        assert!(job.next_status().await.is_none());
        let report = job.wait().await.expect("report");
        assert_eq!(report.total, 0);
    }
}
