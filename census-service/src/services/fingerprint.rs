use std::collections::HashSet;

use super::error::SyncError;
use super::hashing::keyed_hash;
use crate::models::{Census, Fingerprints, Member, TwoFaField};

/// Reject configurations no fingerprint can be derived from.
///
/// More than two verification channels, or a field listed twice, are
/// treated as misconfiguration rather than given an ad-hoc meaning.
pub fn validate_census_fields(census: &Census) -> Result<(), SyncError> {
    if !census.has_auth_config() {
        return Err(SyncError::InvalidCensusConfig(format!(
            "census {} has no auth or two-factor fields",
            census.id
        )));
    }
    if census.two_fa_fields.len() > 2 {
        return Err(SyncError::InvalidCensusConfig(format!(
            "census {} configures {} two-factor fields, at most 2 are supported",
            census.id,
            census.two_fa_fields.len()
        )));
    }
    let mut seen_auth = HashSet::new();
    if let Some(dup) = census.auth_fields.iter().find(|f| !seen_auth.insert(**f)) {
        return Err(SyncError::InvalidCensusConfig(format!(
            "census {} lists auth field {} twice",
            census.id, dup
        )));
    }
    let mut seen_two_fa = HashSet::new();
    if let Some(dup) = census.two_fa_fields.iter().find(|f| !seen_two_fa.insert(**f)) {
        return Err(SyncError::InvalidCensusConfig(format!(
            "census {} lists two-factor field {} twice",
            census.id, dup
        )));
    }
    Ok(())
}

/// Derive the fingerprint set of a sanitized member under `census`.
///
/// The primary fingerprint covers every auth field followed by every
/// two-factor field, in declaration order. When both channels are
/// configured, each channel also gets a secondary fingerprint (auth fields
/// plus that channel alone) as long as the member has a value for it.
pub fn compute_fingerprints(census: &Census, member: &Member) -> Result<Fingerprints, SyncError> {
    validate_census_fields(census)?;

    let auth_values: Vec<&str> = census
        .auth_fields
        .iter()
        .map(|field| member.auth_value(*field))
        .collect();

    let mut primary_values = auth_values.clone();
    primary_values.extend(
        census
            .two_fa_fields
            .iter()
            .map(|field| member.two_fa_value(*field)),
    );
    let primary = keyed_hash(&member.org_id, &primary_values)?;

    let mut fingerprints = Fingerprints {
        primary,
        email: None,
        phone: None,
    };

    if census.uses_secondary_fingerprints() {
        fingerprints.email = secondary(member, &auth_values, TwoFaField::Email)?;
        fingerprints.phone = secondary(member, &auth_values, TwoFaField::Phone)?;
    }

    Ok(fingerprints)
}

fn secondary(
    member: &Member,
    auth_values: &[&str],
    channel: TwoFaField,
) -> Result<Option<String>, SyncError> {
    let value = member.two_fa_value(channel);
    if value.is_empty() {
        return Ok(None);
    }
    let mut values = auth_values.to_vec();
    values.push(value);
    keyed_hash(&member.org_id, &values).map(Some)
}
