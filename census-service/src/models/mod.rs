pub mod census;
pub mod group;
pub mod job;
pub mod member;
pub mod organization;
pub mod participant;

pub use census::{AuthField, Census, TwoFaField};
pub use group::MemberGroup;
pub use job::{
    BulkJobStatus, ChunkError, FieldWarning, ParticipantConflict, RecordFailure, SyncReport,
};
pub use member::{Member, MemberField, MemberFieldMask, MemberUpsert, RawMember};
pub use organization::Organization;
pub use participant::{CensusParticipant, FingerprintSlot, Fingerprints, ParticipantUpsert};
