mod common;

use census_service::workers::SyncTarget;
use common::{sample_members, test_settings, TestApp, TEST_ORG_ID};
use std::time::Duration;
use tokio_stream::StreamExt;

#[tokio::test]
async fn test_slow_consumer_still_sees_completion() {
    let mut settings = test_settings();
    settings.batch_size = 2;
    settings.progress_capacity = 1;
    settings.progress_interval = Duration::from_millis(1);
    let app = TestApp::spawn_with(settings).await;
    app.store.set_write_delay(Duration::from_millis(5)).await;

    let mut job = app
        .engine
        .start_bulk_sync(TEST_ORG_ID, &app.salt, SyncTarget::MemberPool, sample_members(20))
        .await
        .expect("start");

    // Let the job finish before reading anything.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut snapshots = Vec::new();
    while let Some(status) = job.next_status().await {
        snapshots.push(status);
    }

    let last = snapshots.last().expect("final snapshot");
    assert_eq!(last.processed, 20);
    assert_eq!(last.total, 20);
    assert_eq!(last.progress(), 100.0);
    assert!(!last.cancelled);

    let report = job.wait().await.expect("report");
    assert_eq!(report.processed, 20);
}

#[tokio::test]
async fn test_snapshots_start_at_zero_and_never_go_backwards() {
    let mut settings = test_settings();
    settings.progress_capacity = 100;
    settings.progress_interval = Duration::from_millis(1);
    let app = TestApp::spawn_with(settings).await;
    app.store.set_write_delay(Duration::from_millis(10)).await;

    let (snapshots, report) = app.sync(SyncTarget::MemberPool, sample_members(12)).await;

    assert_eq!(snapshots.first().map(|s| s.processed), Some(0));
    assert!(snapshots.windows(2).all(|w| w[0].processed <= w[1].processed));
    let last = snapshots.last().expect("final snapshot");
    assert_eq!(last.processed, 12);
    assert_eq!(last.added, report.added);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_snapshot_is_zero_on_a_threaded_runtime() {
    let app = TestApp::spawn().await;

    for _ in 0..50 {
        let (snapshots, report) = app.sync(SyncTarget::MemberPool, sample_members(3)).await;
        let first = snapshots.first().expect("initial snapshot");
        assert_eq!(first.processed, 0);
        assert_eq!(first.added, 0);
        assert_eq!(report.processed, 3);
    }
}

#[tokio::test]
async fn test_cancel_stops_before_next_chunk() {
    let mut settings = test_settings();
    settings.batch_size = 2;
    let app = TestApp::spawn_with(settings).await;
    app.store.set_write_delay(Duration::from_millis(50)).await;

    let mut job = app
        .engine
        .start_bulk_sync(TEST_ORG_ID, &app.salt, SyncTarget::MemberPool, sample_members(20))
        .await
        .expect("start");

    let first = job.next_status().await.expect("initial snapshot");
    assert_eq!(first.processed, 0);
    job.cancel();

    let (progress, handle) = job.split();
    let snapshots: Vec<_> = progress.collect().await;
    let report = handle.wait().await.expect("report");

    let last = snapshots.last().expect("final snapshot");
    assert!(last.cancelled);
    assert!(report.cancelled);
    assert!(report.processed < 20);
    assert_eq!(last.processed, report.processed);
    assert_eq!(app.store.members(TEST_ORG_ID).await.len(), report.processed);
}

#[tokio::test]
async fn test_dropped_stream_does_not_block_the_job() {
    let mut settings = test_settings();
    settings.progress_capacity = 1;
    settings.progress_interval = Duration::from_millis(1);
    let app = TestApp::spawn_with(settings).await;

    let job = app
        .engine
        .start_bulk_sync(TEST_ORG_ID, &app.salt, SyncTarget::MemberPool, sample_members(9))
        .await
        .expect("start");

    let (progress, handle) = job.split();
    drop(progress);

    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("job finished")
        .expect("report");
    assert_eq!(report.processed, 9);
    assert_eq!(report.added, 9);
}
