use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use super::error::SyncError;

type HmacSha256 = Hmac<Sha256>;

/// Salted one-way password hashing. Implementations must be deterministic
/// for a given salt so re-syncing an unchanged list is a no-op.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, salt: &SecretString, password: &str) -> Result<String, SyncError>;
}

/// HMAC-SHA256 keyed by the secret salt. Cheap enough for bulk imports.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacPasswordHasher;

impl PasswordHasher for HmacPasswordHasher {
    fn hash(&self, salt: &SecretString, password: &str) -> Result<String, SyncError> {
        let mut mac = HmacSha256::new_from_slice(salt.expose_secret().as_bytes())
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("Invalid key length: {}", e)))?;
        mac.update(password.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Argon2id with a salt derived from the secret salt.
///
/// Produces PHC strings (`$argon2id$...`) verifiable with [`verify_argon2`].
#[derive(Debug, Clone, Default)]
pub struct Argon2PasswordHasher;

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, salt: &SecretString, password: &str) -> Result<String, SyncError> {
        let digest = Sha256::digest(salt.expose_secret().as_bytes());
        let salt_string = SaltString::encode_b64(&digest[..16])
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("Failed to encode salt: {}", e)))?;

        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt_string)
            .map_err(|e| SyncError::Internal(anyhow::anyhow!("Failed to hash password: {}", e)))?
            .to_string();

        Ok(password_hash)
    }
}

/// Verify a password against an Argon2 PHC string.
pub fn verify_argon2(password: &str, password_hash: &str) -> Result<(), SyncError> {
    let parsed_hash = PasswordHash::new(password_hash).map_err(|e| {
        SyncError::Internal(anyhow::anyhow!("Invalid password hash format: {}", e))
    })?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| SyncError::InvalidInput("Password verification failed".to_string()))
}
