mod common;

use census_service::models::{AuthField, Census};
use census_service::services::{CensusStore, SyncError};
use census_service::workers::SyncTarget;
use common::{
    member, phone, sample_members, test_settings, TestApp, TEST_CENSUS_ID, TEST_GROUP_ID,
    TEST_ORG_ID,
};
use std::time::Duration;

fn fingerprint_table(participants: &[census_service::models::CensusParticipant]) -> Vec<(String, String, Option<String>, Option<String>)> {
    let mut table: Vec<_> = participants
        .iter()
        .map(|p| {
            (
                p.participant_id.clone(),
                p.login_hash.clone(),
                p.login_hash_email.clone(),
                p.login_hash_phone.clone(),
            )
        })
        .collect();
    table.sort();
    table
}

#[tokio::test]
async fn test_bulk_sync_creates_members_and_participants() {
    let app = TestApp::spawn().await;

    let report = app.sync_census(sample_members(7)).await;

    assert_eq!(report.total, 7);
    assert_eq!(report.processed, 7);
    assert_eq!(report.added, 7);
    assert_eq!(report.participants, 7);
    assert!(report.chunk_errors.is_empty());
    assert!(report.conflicts.is_empty());
    assert!(report.warnings.is_empty());

    let members = app.store.members(TEST_ORG_ID).await;
    assert_eq!(members.len(), 7);
    assert!(members.iter().all(|m| !m.hashed_phone.is_empty()));
    assert!(members.iter().all(|m| !m.hashed_phone.starts_with('+')));

    let participants = app.store.participants(TEST_CENSUS_ID).await;
    assert_eq!(participants.len(), 7);
    assert!(participants
        .iter()
        .all(|p| p.login_hash_email.is_some() && p.login_hash_phone.is_some()));
}

#[tokio::test]
async fn test_bulk_sync_is_idempotent() {
    let app = TestApp::spawn().await;
    let members = sample_members(8);

    app.sync_census(members.clone()).await;
    let first = fingerprint_table(&app.store.participants(TEST_CENSUS_ID).await);

    let report = app.sync_census(members).await;
    let second = fingerprint_table(&app.store.participants(TEST_CENSUS_ID).await);

    assert!(report.conflicts.is_empty());
    assert_eq!(first, second);
    assert_eq!(
        app.store
            .count_participants(TEST_CENSUS_ID)
            .await
            .expect("count"),
        8
    );
    assert_eq!(app.store.members(TEST_ORG_ID).await.len(), 8);
}

#[tokio::test]
async fn test_member_number_keeps_identity_across_imports() {
    let app = TestApp::spawn().await;
    let record = |email: &str| census_service::models::RawMember {
        member_number: "A-100".to_string(),
        name: "Marta".to_string(),
        surname: "Ruiz".to_string(),
        email: email.to_string(),
        ..Default::default()
    };

    app.sync(SyncTarget::MemberPool, vec![record("marta@example.com")])
        .await;
    app.sync(SyncTarget::MemberPool, vec![record("marta.ruiz@example.com")])
        .await;

    let members = app.store.members(TEST_ORG_ID).await;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].member_number, "A-100");
    assert_eq!(members[0].email, "marta.ruiz@example.com");
}

#[tokio::test]
async fn test_empty_input_returns_closed_stream() {
    let app = TestApp::spawn().await;

    let mut job = app
        .engine
        .start_bulk_sync(
            TEST_ORG_ID,
            &app.salt,
            SyncTarget::Census(TEST_CENSUS_ID.to_string()),
            Vec::new(),
        )
        .await
        .expect("Empty input must not be an error");

    assert!(job.next_status().await.is_none());
    let report = job.wait().await.expect("report");
    assert_eq!(report.total, 0);
    assert!(app.store.members(TEST_ORG_ID).await.is_empty());
}

#[tokio::test]
async fn test_preconditions_fail_immediately() {
    let app = TestApp::spawn().await;
    let members = sample_members(1);

    let err = app
        .engine
        .start_bulk_sync("missing-org", &app.salt, SyncTarget::MemberPool, members.clone())
        .await
        .err()
        .expect("unknown organization");
    assert!(matches!(err, SyncError::NotFound { entity: "organization", .. }));

    let err = app
        .engine
        .start_bulk_sync(
            TEST_ORG_ID,
            &app.salt,
            SyncTarget::Census("missing-census".to_string()),
            members.clone(),
        )
        .await
        .err()
        .expect("unknown census");
    assert!(matches!(err, SyncError::NotFound { entity: "census", .. }));

    let err = app
        .engine
        .start_bulk_sync(
            TEST_ORG_ID,
            &app.salt,
            SyncTarget::Group(" ".to_string()),
            members.clone(),
        )
        .await
        .err()
        .expect("blank group id");
    assert!(matches!(err, SyncError::InvalidInput(_)));

    app.store
        .insert_census(Census::new("unconfigured", TEST_ORG_ID, vec![], vec![]))
        .await;
    let err = app
        .engine
        .start_bulk_sync(
            TEST_ORG_ID,
            &app.salt,
            SyncTarget::Census("unconfigured".to_string()),
            members,
        )
        .await
        .err()
        .expect("census without fields");
    assert!(matches!(err, SyncError::InvalidCensusConfig(_)));
    assert!(app.store.members(TEST_ORG_ID).await.is_empty());
}

#[tokio::test]
async fn test_census_of_another_org_is_not_found() {
    let app = TestApp::spawn().await;
    app.store
        .insert_census(Census::new(
            "foreign",
            common::OTHER_ORG_ID,
            vec![AuthField::Name],
            vec![],
        ))
        .await;

    let err = app
        .engine
        .start_bulk_sync(
            TEST_ORG_ID,
            &app.salt,
            SyncTarget::Census("foreign".to_string()),
            sample_members(1),
        )
        .await
        .err()
        .expect("foreign census");
    assert!(matches!(err, SyncError::NotFound { entity: "census", .. }));
}

#[tokio::test]
async fn test_failed_chunk_does_not_stop_later_chunks() {
    let app = TestApp::spawn().await;
    app.store.fail_member_writes_containing("member-0004").await;

    let report = app.sync_census(sample_members(9)).await;

    assert_eq!(report.processed, 9);
    assert_eq!(report.chunk_errors.len(), 1);
    let failure = &report.chunk_errors[0];
    assert_eq!(failure.chunk, 1);
    assert_eq!(failure.first_member_id, "member-0003");
    assert_eq!(failure.last_member_id, "member-0005");
    assert!(failure.retryable);

    let ids: Vec<String> = app
        .store
        .members(TEST_ORG_ID)
        .await
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(
        ids,
        vec![
            "member-0000",
            "member-0001",
            "member-0002",
            "member-0006",
            "member-0007",
            "member-0008"
        ]
    );
    assert_eq!(app.store.participants(TEST_CENSUS_ID).await.len(), 6);

    // Re-submitting the same input repairs the failed chunk.
    app.store.clear_faults().await;
    let retry = app.sync_census(sample_members(9)).await;
    assert!(retry.chunk_errors.is_empty());
    assert_eq!(app.store.participants(TEST_CENSUS_ID).await.len(), 9);
}

#[tokio::test]
async fn test_refused_record_does_not_block_its_chunk() {
    let app = TestApp::spawn().await;
    app.engine
        .start_bulk_sync(
            common::OTHER_ORG_ID,
            &app.salt,
            SyncTarget::MemberPool,
            vec![member("taken", "Eva", "Ruiz", "eva@example.com", &phone(50))],
        )
        .await
        .expect("start")
        .wait()
        .await
        .expect("report");

    let mut members = sample_members(2);
    members.push(member("taken", "Eva", "Ruiz", "eva@example.com", &phone(50)));

    for _ in 0..2 {
        let report = app.sync_census(members.clone()).await;

        assert!(report.chunk_errors.is_empty(), "{:?}", report.chunk_errors);
        assert_eq!(report.failed_records.len(), 1);
        let refused = &report.failed_records[0];
        assert_eq!(refused.member_id, "taken");
        assert_eq!(refused.operation, "upsert_members");
        assert!(!refused.retryable);
        assert_eq!(app.store.participants(TEST_CENSUS_ID).await.len(), 2);
    }

    assert!(app
        .store
        .find_participant(TEST_CENSUS_ID, "member-0001")
        .await
        .expect("lookup")
        .is_some());
    assert!(app
        .store
        .find_participant(TEST_CENSUS_ID, "taken")
        .await
        .expect("lookup")
        .is_none());
    let theirs = app.store.members(common::OTHER_ORG_ID).await;
    assert_eq!(theirs.len(), 1);
    assert_eq!(theirs[0].name, "Eva");
}

#[tokio::test]
async fn test_store_timeout_is_reported_per_chunk() {
    let mut settings = test_settings();
    settings.write_timeout = Duration::from_millis(20);
    let app = TestApp::spawn_with(settings).await;
    app.store.set_write_delay(Duration::from_millis(200)).await;

    let report = app.sync(SyncTarget::MemberPool, sample_members(4)).await.1;

    assert_eq!(report.processed, 4);
    assert_eq!(report.chunk_errors.len(), 2);
    assert!(report.chunk_errors.iter().all(|e| e.retryable));
    assert!(report.chunk_errors[0].error.contains("upsert_members"));
}

#[tokio::test]
async fn test_colliding_records_in_one_import_are_rejected() {
    let app = TestApp::spawn().await;
    let members = vec![
        member("first", "Ana", "Garcia", "ana@example.com", &phone(1)),
        member("second", "Ana", "Garcia", "ana@example.com", &phone(1)),
        member("third", "Luis", "Mora", "luis@example.com", &phone(3)),
    ];

    let report = app.sync_census(members).await;

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].participant_id, "second");
    assert_eq!(report.conflicts[0].conflicting_participant_id, "first");
    assert_eq!(report.participants, 2);

    let ids: Vec<String> = app
        .store
        .participants(TEST_CENSUS_ID)
        .await
        .into_iter()
        .map(|p| p.participant_id)
        .collect();
    assert_eq!(ids, vec!["first", "third"]);
    assert!(app
        .store
        .members(TEST_ORG_ID)
        .await
        .iter()
        .all(|m| m.id != "second"));
}

#[tokio::test]
async fn test_collision_with_earlier_chunk_is_detected() {
    let app = TestApp::spawn().await;
    let mut members = sample_members(3);
    members.push(member("late-duplicate", "Name0", "Surname0", "member0@example.com", &phone(99)));

    let report = app.sync_census(members).await;

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].participant_id, "late-duplicate");
    assert_eq!(report.conflicts[0].conflicting_participant_id, "member-0000");
    assert_eq!(app.store.participants(TEST_CENSUS_ID).await.len(), 3);
}

#[tokio::test]
async fn test_member_pool_allows_duplicate_values() {
    let app = TestApp::spawn().await;
    let members = vec![
        member("first", "Ana", "Garcia", "ana@example.com", &phone(1)),
        member("second", "Ana", "Garcia", "ana@example.com", &phone(1)),
    ];

    let (_, report) = app.sync(SyncTarget::MemberPool, members).await;

    assert_eq!(report.added, 2);
    assert!(report.conflicts.is_empty());
    assert_eq!(app.store.members(TEST_ORG_ID).await.len(), 2);
    assert!(app.store.participants(TEST_CENSUS_ID).await.is_empty());
}

#[tokio::test]
async fn test_field_warnings_do_not_block_records() {
    let app = TestApp::spawn().await;
    let mut bad = member("bad", "Eva", "Soto", "not-an-email", "12");
    bad.birth_date = "15/01/1990".to_string();

    let report = app.sync_census(vec![bad]).await;

    assert_eq!(report.added, 1);
    let fields: Vec<&str> = report.warnings.iter().map(|w| w.field.as_str()).collect();
    assert_eq!(fields, vec!["email", "hashed_phone", "birth_date"]);

    let stored = &app.store.members(TEST_ORG_ID).await[0];
    assert!(stored.email.is_empty());
    assert!(stored.hashed_phone.is_empty());
    assert!(stored.parsed_birth_date.is_none());

    let participant = &app.store.participants(TEST_CENSUS_ID).await[0];
    assert!(participant.login_hash_email.is_none());
    assert!(participant.login_hash_phone.is_none());
}

#[tokio::test]
async fn test_group_target_adds_members_once() {
    let app = TestApp::spawn().await;
    let members = sample_members(4);

    app.sync(SyncTarget::Group(TEST_GROUP_ID.to_string()), members.clone())
        .await;
    app.sync(SyncTarget::Group(TEST_GROUP_ID.to_string()), members)
        .await;

    let group = app
        .store
        .find_group(TEST_GROUP_ID)
        .await
        .expect("lookup")
        .expect("group");
    assert_eq!(group.member_ids.len(), 4);
    assert!(app.store.participants(TEST_CENSUS_ID).await.is_empty());
}

#[tokio::test]
async fn test_publish_group_to_census() {
    let app = TestApp::spawn().await;
    app.sync(SyncTarget::Group(TEST_GROUP_ID.to_string()), sample_members(5))
        .await;

    let job = app
        .engine
        .publish_group_to_census(TEST_ORG_ID, TEST_CENSUS_ID, TEST_GROUP_ID)
        .await
        .expect("publish");
    let report = job.wait().await.expect("report");

    assert_eq!(report.total, 5);
    assert_eq!(report.processed, 5);
    assert_eq!(report.participants, 5);
    assert_eq!(app.store.participants(TEST_CENSUS_ID).await.len(), 5);
}

#[tokio::test]
async fn test_same_phone_hashes_differently_per_org() {
    let app = TestApp::spawn().await;
    let shared = member("shared", "Ana", "Garcia", "ana@example.com", &phone(7));

    app.sync(SyncTarget::MemberPool, vec![shared.clone()]).await;
    let other = app
        .engine
        .start_bulk_sync(
            common::OTHER_ORG_ID,
            &app.salt,
            SyncTarget::MemberPool,
            vec![shared.with_id("shared-other")],
        )
        .await
        .expect("start");
    other.wait().await.expect("report");

    let ours = &app.store.members(TEST_ORG_ID).await[0];
    let theirs = &app.store.members(common::OTHER_ORG_ID).await[0];
    assert!(!ours.hashed_phone.is_empty());
    assert_ne!(ours.hashed_phone, theirs.hashed_phone);
}

#[tokio::test]
async fn test_delete_members_cascades_to_participants() {
    let app = TestApp::spawn().await;
    app.sync_census(sample_members(3)).await;

    let deleted = app
        .members
        .delete_members(TEST_ORG_ID, &["member-0000".to_string(), "member-0001".to_string()])
        .await
        .expect("delete");

    assert_eq!(deleted.members, 2);
    assert_eq!(deleted.participants, 2);
    let remaining = app.store.participants(TEST_CENSUS_ID).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].participant_id, "member-0002");
}

#[tokio::test]
async fn test_delete_members_ignores_other_orgs() {
    let app = TestApp::spawn().await;
    app.sync_census(sample_members(1)).await;

    let deleted = app
        .members
        .delete_members(common::OTHER_ORG_ID, &["member-0000".to_string()])
        .await
        .expect("delete");

    assert_eq!(deleted.members, 0);
    assert_eq!(app.store.participants(TEST_CENSUS_ID).await.len(), 1);
}
