#![allow(dead_code)]

use census_service::config::SyncSettings;
use census_service::models::{
    AuthField, BulkJobStatus, Census, MemberGroup, Organization, RawMember, SyncReport, TwoFaField,
};
use census_service::services::{CensusStore, MemberSync, MemoryStore, SyncContext, WriteGate};
use census_service::workers::{BulkSyncEngine, SyncTarget};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_ORG_ID: &str = "test-org";
pub const OTHER_ORG_ID: &str = "other-org";
pub const TEST_CENSUS_ID: &str = "test-census";
pub const PRIMARY_ONLY_CENSUS_ID: &str = "primary-only-census";
pub const TEST_GROUP_ID: &str = "test-group";

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub engine: BulkSyncEngine,
    pub members: MemberSync,
    pub salt: SecretString,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(test_settings()).await
    }

    pub async fn spawn_with(settings: SyncSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_organization(Organization::new(TEST_ORG_ID, "Test Org"))
            .await;
        store
            .insert_organization(Organization::new(OTHER_ORG_ID, "Other Org"))
            .await;
        store
            .insert_census(Census::new(
                TEST_CENSUS_ID,
                TEST_ORG_ID,
                vec![AuthField::Name, AuthField::Surname],
                vec![TwoFaField::Email, TwoFaField::Phone],
            ))
            .await;
        store
            .insert_census(Census::new(
                PRIMARY_ONLY_CENSUS_ID,
                TEST_ORG_ID,
                vec![AuthField::MemberNumber],
                vec![TwoFaField::Email],
            ))
            .await;
        store
            .insert_group(MemberGroup::new(TEST_GROUP_ID, TEST_ORG_ID, "Board"))
            .await;

        let dyn_store: Arc<dyn CensusStore> = store.clone();
        let ctx = SyncContext::new(dyn_store, settings).with_write_gate(WriteGate::new());

        TestApp {
            store,
            engine: BulkSyncEngine::new(ctx.clone()),
            members: MemberSync::new(ctx),
            salt: SecretString::new("test-salt".to_string()),
        }
    }

    /// Run a bulk import to completion, returning every snapshot seen and the report.
    pub async fn sync(
        &self,
        target: SyncTarget,
        members: Vec<RawMember>,
    ) -> (Vec<BulkJobStatus>, SyncReport) {
        let mut job = self
            .engine
            .start_bulk_sync(TEST_ORG_ID, &self.salt, target, members)
            .await
            .expect("Failed to start bulk sync");

        let mut snapshots = Vec::new();
        while let Some(status) = job.next_status().await {
            snapshots.push(status);
        }
        let report = job.wait().await.expect("Bulk job failed");
        (snapshots, report)
    }

    pub async fn sync_census(&self, members: Vec<RawMember>) -> SyncReport {
        self.sync(SyncTarget::Census(TEST_CENSUS_ID.to_string()), members)
            .await
            .1
    }
}

pub fn test_settings() -> SyncSettings {
    SyncSettings {
        batch_size: 3,
        progress_interval: Duration::from_millis(20),
        progress_capacity: 10,
        write_timeout: Duration::from_secs(2),
        query_timeout: Duration::from_secs(2),
        phone_region: "ES".to_string(),
    }
}

pub fn member(id: &str, name: &str, surname: &str, email: &str, phone: &str) -> RawMember {
    RawMember {
        id: Some(id.to_string()),
        name: name.to_string(),
        surname: surname.to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
        birth_date: "1990-01-15".to_string(),
        ..RawMember::default()
    }
}

/// Spanish mobile number unique per index.
pub fn phone(index: usize) -> String {
    format!("+34 61{:07}", index)
}

/// `count` members with pairwise distinct identities and contact data.
pub fn sample_members(count: usize) -> Vec<RawMember> {
    (0..count)
        .map(|i| {
            member(
                &format!("member-{:04}", i),
                &format!("Name{}", i),
                &format!("Surname{}", i),
                &format!("member{}@example.com", i),
                &phone(i),
            )
        })
        .collect()
}
