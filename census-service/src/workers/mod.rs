mod bulk;
mod progress;

pub use bulk::{BulkJob, BulkJobHandle, BulkSyncEngine, SyncTarget};
pub use progress::{JobCounters, ProgressReporter};
