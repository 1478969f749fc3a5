use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::BulkJobStatus;

/// Counters shared between a running job and its reporter.
#[derive(Debug, Default)]
pub struct JobCounters {
    total: usize,
    processed: AtomicUsize,
    added: AtomicUsize,
    cancelled: AtomicBool,
}

impl JobCounters {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Only the engine task writes, one chunk at a time, so `processed` is monotonic.
    pub fn record_chunk(&self, processed: usize, added: usize) {
        self.processed.fetch_add(processed, Ordering::Release);
        self.added.fetch_add(added, Ordering::Release);
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> BulkJobStatus {
        BulkJobStatus {
            processed: self.processed.load(Ordering::Acquire),
            total: self.total,
            added: self.added.load(Ordering::Acquire),
            cancelled: self.cancelled.load(Ordering::Acquire),
        }
    }
}

/// Emits job snapshots: once on start, on every interval tick, and a final
/// one when `done` fires.
///
/// Intermediate snapshots are dropped while the channel is full. The final
/// snapshot waits for capacity, so a slow consumer still observes completion.
pub struct ProgressReporter {
    counters: Arc<JobCounters>,
    interval: Duration,
    tx: mpsc::Sender<BulkJobStatus>,
    done: CancellationToken,
}

impl ProgressReporter {
    pub fn new(
        counters: Arc<JobCounters>,
        interval: Duration,
        tx: mpsc::Sender<BulkJobStatus>,
        done: CancellationToken,
    ) -> Self {
        Self {
            counters,
            interval,
            tx,
            done,
        }
    }

    /// The initial snapshot is queued before this returns, ahead of any
    /// work started afterwards.
    pub fn spawn(self) -> JoinHandle<()> {
        let open = self.offer(self.counters.snapshot());
        tokio::spawn(async move {
            if open {
                self.run().await;
            }
        })
    }

    async fn run(self) {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.done.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.offer(self.counters.snapshot()) {
                        return;
                    }
                }
            }
        }

        let last = self.counters.snapshot();
        if self.tx.send(last).await.is_err() {
            tracing::debug!("Progress consumer went away before the final snapshot");
            return;
        }
        tracing::debug!(
            processed = last.processed,
            total = last.total,
            cancelled = last.cancelled,
            "Final progress snapshot delivered"
        );
    }

    /// Non-blocking send. Returns false once the consumer has dropped the stream.
    fn offer(&self, status: BulkJobStatus) -> bool {
        match self.tx.try_send(status) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(processed = status.processed, "Progress channel full, snapshot dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Progress consumer went away, reporter stopping");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emits_initial_and_final_snapshot() {
        let counters = Arc::new(JobCounters::new(4));
        let (tx, mut rx) = mpsc::channel(10);
        let done = CancellationToken::new();
        let handle = ProgressReporter::new(counters.clone(), Duration::from_secs(60), tx, done.clone())
            .spawn();

        let first = rx.recv().await.expect("initial snapshot");
        assert_eq!(first.processed, 0);
        assert_eq!(first.total, 4);

        counters.record_chunk(4, 3);
        done.cancel();

        let last = rx.recv().await.expect("final snapshot");
        assert_eq!(last.processed, 4);
        assert_eq!(last.added, 3);
        assert!(last.is_complete());
        assert!(rx.recv().await.is_none());
        handle.await.expect("reporter task");
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_queued_on_spawn() {
        let counters = Arc::new(JobCounters::new(3));
        let (tx, mut rx) = mpsc::channel(4);
        let done = CancellationToken::new();
        ProgressReporter::new(counters.clone(), Duration::from_secs(60), tx, done.clone()).spawn();

        assert_eq!(rx.try_recv().expect("queued").processed, 0);
        counters.record_chunk(3, 3);
        done.cancel();
        assert_eq!(rx.recv().await.expect("final snapshot").processed, 3);
    }

    #[tokio::test]
    async fn test_final_snapshot_survives_full_channel() {
        let counters = Arc::new(JobCounters::new(10));
        let (tx, mut rx) = mpsc::channel(1);
        let done = CancellationToken::new();
        let handle = ProgressReporter::new(counters.clone(), Duration::from_millis(1), tx, done.clone())
            .spawn();

        tokio::time::sleep(Duration::from_millis(20)).await;
        counters.record_chunk(10, 10);
        done.cancel();

        let mut last = None;
        while let Some(status) = rx.recv().await {
            last = Some(status);
        }
        let last = last.expect("at least one snapshot");
        assert_eq!(last.processed, 10);
        assert_eq!(last.total, 10);
        handle.await.expect("reporter task");
    }

    #[tokio::test]
    async fn test_cancelled_flag_reaches_final_snapshot() {
        let counters = Arc::new(JobCounters::new(10));
        let (tx, mut rx) = mpsc::channel(10);
        let done = CancellationToken::new();
        ProgressReporter::new(counters.clone(), Duration::from_secs(60), tx, done.clone()).spawn();

        counters.record_chunk(2, 2);
        counters.mark_cancelled();
        done.cancel();

        let mut last = None;
        while let Some(status) = rx.recv().await {
            last = Some(status);
        }
        let last = last.expect("final snapshot");
        assert!(last.cancelled);
        assert_eq!(last.processed, 2);
        assert!(!last.is_complete());
    }
}
