use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::SyncError;

type HmacSha256 = Hmac<Sha256>;

/// Separator between hashed values, so that ("ab", "c") and ("a", "bc") differ.
const FIELD_SEPARATOR: &str = "\u{1f}";

/// Hex HMAC-SHA256 of `parts` keyed by `key`.
///
/// Keyed by organization id for phone hashes and fingerprints, so equal
/// inputs in different organizations never produce equal digests.
pub fn keyed_hash(key: &str, parts: &[&str]) -> Result<String, SyncError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| SyncError::Internal(anyhow::anyhow!("Invalid key length: {}", e)))?;

    mac.update(parts.join(FIELD_SEPARATOR).as_bytes());
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}
