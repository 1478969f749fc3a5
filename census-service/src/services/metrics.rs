//! Counters for the synchronization engine.
//!
//! Emitted through the `metrics` facade; the embedding binary decides whether
//! a recorder is installed.

/// Members written by a grouped upsert.
pub fn record_members_synced(org_id: &str, target: &'static str, count: u64) {
    metrics::counter!(
        "census_members_synced_total",
        "org_id" => org_id.to_string(),
        "target" => target
    )
    .increment(count);
}

/// Participants written by a grouped upsert.
pub fn record_participants_synced(census_id: &str, count: u64) {
    metrics::counter!(
        "census_participants_synced_total",
        "census_id" => census_id.to_string()
    )
    .increment(count);
}

/// Participant writes rejected by the conflict detector.
pub fn record_fingerprint_conflicts(census_id: &str, count: u64) {
    metrics::counter!(
        "census_fingerprint_conflicts_total",
        "census_id" => census_id.to_string()
    )
    .increment(count);
}

pub fn record_chunk_failure(org_id: &str, retryable: bool) {
    metrics::counter!(
        "census_chunk_failures_total",
        "org_id" => org_id.to_string(),
        "retryable" => if retryable { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_field_warnings(org_id: &str, count: u64) {
    if count == 0 {
        return;
    }
    metrics::counter!(
        "census_field_warnings_total",
        "org_id" => org_id.to_string()
    )
    .increment(count);
}
