use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use super::error::SyncError;

static GLOBAL_GATE: OnceLock<WriteGate> = OnceLock::new();

/// Coarse mutual exclusion for store mutations.
///
/// Held only around store calls (conflict query plus writes), never while
/// sanitizing or hashing, so at most one mutation sequence is in flight.
#[derive(Clone, Default)]
pub struct WriteGate {
    lock: Arc<Mutex<()>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide gate shared by every service instance that does not supply its own.
    pub fn global() -> Self {
        GLOBAL_GATE.get_or_init(WriteGate::new).clone()
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

/// Run a store call under a deadline. Expiry is a retryable [`SyncError::Timeout`].
pub async fn with_deadline<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = after.as_millis() as u64, "Store call timed out");
            Err(SyncError::Timeout { operation, after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_expiry_is_retryable() {
        let result: Result<(), SyncError> = with_deadline("slow_call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, SyncError::Timeout { operation: "slow_call", .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_deadline_passes_result_through() {
        let value = with_deadline("fast_call", Duration::from_secs(1), async { Ok(7) })
            .await
            .expect("value");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_gate_serializes_holders() {
        let gate = WriteGate::new();
        let guard = gate.acquire().await;
        assert!(gate.lock.try_lock().is_err());
        drop(guard);
        assert!(gate.lock.try_lock().is_ok());
    }

    #[test]
    fn test_global_gate_is_shared() {
        let a = WriteGate::global();
        let b = WriteGate::global();
        assert!(Arc::ptr_eq(&a.lock, &b.lock));
    }
}
