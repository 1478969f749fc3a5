pub mod conflict;
pub mod context;
pub mod database;
pub mod error;
pub mod fingerprint;
pub mod hashing;
pub mod member_sync;
pub mod memory;
pub mod metrics;
pub mod password;
pub mod sanitizer;
pub mod store;
pub mod write_gate;

pub use conflict::ConflictDetector;
pub use context::{PreparedMember, SyncContext};
pub use database::CensusDb;
pub use error::SyncError;
pub use fingerprint::{compute_fingerprints, validate_census_fields};
pub use member_sync::{DeletedMembers, MemberSync, MemberUpdate};
pub use memory::MemoryStore;
pub use password::{Argon2PasswordHasher, HmacPasswordHasher, PasswordHasher};
pub use sanitizer::{FieldSanitizer, SanitizedMember};
pub use store::{CensusStore, WriteFailure, WriteSummary};
pub use write_gate::{with_deadline, WriteGate};
