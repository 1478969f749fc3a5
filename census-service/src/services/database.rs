use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, DateTime as BsonDateTime, Document},
    options::IndexOptions,
    Client as MongoClient, Collection, Database, IndexModel,
};

use super::error::SyncError;
use super::store::{CensusStore, WriteFailure, WriteSummary};
use crate::models::{
    Census, CensusParticipant, FingerprintSlot, Member, MemberField, MemberGroup, MemberUpsert,
    Organization, ParticipantUpsert,
};

const ORGANIZATIONS: &str = "organizations";
const CENSUSES: &str = "censuses";
const GROUPS: &str = "member_groups";
const MEMBERS: &str = "members";
const PARTICIPANTS: &str = "census_participants";

#[derive(Clone)]
pub struct CensusDb {
    client: MongoClient,
    db: Database,
}

impl CensusDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, SyncError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            SyncError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), SyncError> {
        tracing::info!("Creating MongoDB indexes for census-service");

        let member_number_index = IndexModel::builder()
            .keys(doc! { "org_id": 1, "member_number": 1 })
            .options(
                IndexOptions::builder()
                    .name("org_member_number_idx".to_string())
                    .build(),
            )
            .build();
        self.members()
            .create_index(member_number_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create org_member_number index: {}", e);
                SyncError::from(e)
            })?;

        let participants = self.participants();

        // One participation per member and census
        let participant_index = IndexModel::builder()
            .keys(doc! { "participant_id": 1, "census_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("participant_census_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        participants
            .create_index(participant_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create participant_census index: {}", e);
                SyncError::from(e)
            })?;

        // Store-level backstop for fingerprint uniqueness within a census
        for slot in FingerprintSlot::ALL {
            let field = slot.document_field();
            let mut options = IndexOptions::builder()
                .name(format!("census_{}_unique", field))
                .unique(true)
                .build();
            if slot != FingerprintSlot::Primary {
                options.partial_filter_expression = Some(doc! { field: { "$type": "string" } });
            }
            let index = IndexModel::builder()
                .keys(doc! { "census_id": 1, field: 1 })
                .options(options)
                .build();
            participants.create_index(index, None).await.map_err(|e| {
                tracing::error!("Failed to create {} index: {}", field, e);
                SyncError::from(e)
            })?;
        }

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), SyncError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                SyncError::from(e)
            })?;
        Ok(())
    }

    pub fn organizations(&self) -> Collection<Organization> {
        self.db.collection(ORGANIZATIONS)
    }

    pub fn censuses(&self) -> Collection<Census> {
        self.db.collection(CENSUSES)
    }

    pub fn groups(&self) -> Collection<MemberGroup> {
        self.db.collection(GROUPS)
    }

    pub fn members(&self) -> Collection<Member> {
        self.db.collection(MEMBERS)
    }

    pub fn participants(&self) -> Collection<CensusParticipant> {
        self.db.collection(PARTICIPANTS)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Grouped upsert: a single `update` command carrying every statement,
    /// unordered so one failing document does not stop the others.
    async fn grouped_update(
        &self,
        collection: &str,
        statements: Vec<Document>,
    ) -> Result<WriteSummary, SyncError> {
        if statements.is_empty() {
            return Ok(WriteSummary::default());
        }
        let reply = self
            .db
            .run_command(
                doc! { "update": collection, "updates": statements, "ordered": false },
                None,
            )
            .await
            .map_err(|e| {
                tracing::error!(collection = %collection, "Grouped update failed: {}", e);
                SyncError::from(e)
            })?;
        Ok(summary_from_reply(&reply))
    }
}

fn read_count(reply: &Document, key: &str) -> u64 {
    match reply.get(key) {
        Some(Bson::Int32(v)) => (*v).max(0) as u64,
        Some(Bson::Int64(v)) => (*v).max(0) as u64,
        Some(Bson::Double(v)) => v.max(0.0) as u64,
        _ => 0,
    }
}

fn summary_from_reply(reply: &Document) -> WriteSummary {
    let upserted = reply
        .get_array("upserted")
        .map(|entries| entries.len() as u64)
        .unwrap_or(0);
    let errors = reply
        .get_array("writeErrors")
        .map(|entries| {
            entries
                .iter()
                .filter_map(Bson::as_document)
                .map(|e| WriteFailure {
                    index: read_count(e, "index") as usize,
                    code: i32::try_from(read_count(e, "code")).unwrap_or(i32::MAX),
                    message: e.get_str("errmsg").unwrap_or("unknown error").to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    WriteSummary {
        matched: read_count(reply, "n").saturating_sub(upserted),
        modified: read_count(reply, "nModified"),
        upserted,
        errors,
    }
}

fn member_statement(upsert: &MemberUpsert) -> Result<Document, SyncError> {
    let m = &upsert.member;
    let mut set = doc! { "updated_at": BsonDateTime::from_chrono(m.updated_at) };
    let mut unset = Document::new();

    for field in upsert.mask.iter() {
        let key = field.as_str();
        match field {
            MemberField::MemberNumber => {
                set.insert(key, m.member_number.clone());
            }
            MemberField::Name => {
                set.insert(key, m.name.clone());
            }
            MemberField::Surname => {
                set.insert(key, m.surname.clone());
            }
            MemberField::NationalId => {
                set.insert(key, m.national_id.clone());
            }
            MemberField::Email => {
                set.insert(key, m.email.clone());
            }
            MemberField::HashedPhone => {
                set.insert(key, m.hashed_phone.clone());
            }
            MemberField::HashedPassword => {
                set.insert(key, m.hashed_password.clone());
            }
            MemberField::BirthDate => {
                set.insert(key, m.birth_date.clone());
                match m.parsed_birth_date {
                    Some(date) => {
                        set.insert("parsed_birth_date", BsonDateTime::from_chrono(date));
                    }
                    None => {
                        unset.insert("parsed_birth_date", "");
                    }
                }
            }
            MemberField::Other => {
                let other = bson::to_bson(&m.other).map_err(|e| {
                    SyncError::Internal(anyhow::anyhow!("Failed to encode member fields: {}", e))
                })?;
                set.insert(key, other);
            }
        }
    }

    let mut update = doc! {
        "$set": set,
        "$setOnInsert": { "created_at": BsonDateTime::from_chrono(m.created_at) },
    };
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }

    Ok(doc! {
        "q": { "_id": m.id.clone(), "org_id": m.org_id.clone() },
        "u": update,
        "upsert": true,
    })
}

fn participant_statement(upsert: &ParticipantUpsert) -> Document {
    let now = BsonDateTime::now();
    let mut set = doc! { "updated_at": now };
    let mut unset = Document::new();

    for slot in FingerprintSlot::ALL {
        match upsert.fingerprints.get(slot) {
            Some(value) => {
                set.insert(slot.document_field(), value);
            }
            None => {
                unset.insert(slot.document_field(), "");
            }
        }
    }

    let mut update = doc! {
        "$set": set,
        "$setOnInsert": { "created_at": now },
    };
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }

    doc! {
        "q": {
            "participant_id": upsert.participant_id.clone(),
            "census_id": upsert.census_id.clone(),
        },
        "u": update,
        "upsert": true,
    }
}

fn fingerprint_filter(census_id: &str, fingerprints: &[String]) -> Document {
    let any_slot: Vec<Document> = FingerprintSlot::ALL
        .iter()
        .map(|slot| doc! { slot.document_field(): { "$in": fingerprints.to_vec() } })
        .collect();
    doc! { "census_id": census_id, "$or": any_slot }
}

#[async_trait]
impl CensusStore for CensusDb {
    async fn find_organization(&self, org_id: &str) -> Result<Option<Organization>, SyncError> {
        Ok(self
            .organizations()
            .find_one(doc! { "_id": org_id }, None)
            .await?)
    }

    async fn find_census(&self, census_id: &str) -> Result<Option<Census>, SyncError> {
        Ok(self.censuses().find_one(doc! { "_id": census_id }, None).await?)
    }

    async fn find_group(&self, group_id: &str) -> Result<Option<MemberGroup>, SyncError> {
        Ok(self.groups().find_one(doc! { "_id": group_id }, None).await?)
    }

    async fn find_member(
        &self,
        org_id: &str,
        member_id: &str,
    ) -> Result<Option<Member>, SyncError> {
        Ok(self
            .members()
            .find_one(doc! { "_id": member_id, "org_id": org_id }, None)
            .await?)
    }

    async fn find_members(
        &self,
        org_id: &str,
        ids: &[String],
        member_numbers: &[String],
    ) -> Result<Vec<Member>, SyncError> {
        if ids.is_empty() && member_numbers.is_empty() {
            return Ok(Vec::new());
        }
        let filter = doc! {
            "org_id": org_id,
            "$or": [
                { "_id": { "$in": ids.to_vec() } },
                { "member_number": { "$in": member_numbers.to_vec() } },
            ],
        };
        let cursor = self.members().find(filter, None).await?;
        let members: Vec<Member> = cursor.try_collect().await.map_err(|e| {
            tracing::error!("Failed to collect members: {}", e);
            SyncError::from(e)
        })?;
        Ok(members)
    }

    async fn upsert_members(
        &self,
        _org_id: &str,
        upserts: &[MemberUpsert],
    ) -> Result<WriteSummary, SyncError> {
        let statements = upserts
            .iter()
            .map(member_statement)
            .collect::<Result<Vec<_>, _>>()?;
        self.grouped_update(MEMBERS, statements).await
    }

    async fn delete_members(&self, org_id: &str, ids: &[String]) -> Result<u64, SyncError> {
        let result = self
            .members()
            .delete_many(doc! { "org_id": org_id, "_id": { "$in": ids.to_vec() } }, None)
            .await?;
        Ok(result.deleted_count)
    }

    async fn add_group_members(
        &self,
        group_id: &str,
        member_ids: &[String],
    ) -> Result<WriteSummary, SyncError> {
        let result = self
            .groups()
            .update_one(
                doc! { "_id": group_id },
                doc! {
                    "$addToSet": { "member_ids": { "$each": member_ids.to_vec() } },
                    "$set": { "updated_at": BsonDateTime::now() },
                },
                None,
            )
            .await?;
        Ok(WriteSummary {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: 0,
            errors: Vec::new(),
        })
    }

    async fn find_participant(
        &self,
        census_id: &str,
        participant_id: &str,
    ) -> Result<Option<CensusParticipant>, SyncError> {
        Ok(self
            .participants()
            .find_one(
                doc! { "census_id": census_id, "participant_id": participant_id },
                None,
            )
            .await?)
    }

    async fn find_participants_by_member(
        &self,
        participant_id: &str,
    ) -> Result<Vec<CensusParticipant>, SyncError> {
        let cursor = self
            .participants()
            .find(doc! { "participant_id": participant_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_participants_by_fingerprints(
        &self,
        census_id: &str,
        fingerprints: &[String],
    ) -> Result<Vec<CensusParticipant>, SyncError> {
        if fingerprints.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self
            .participants()
            .find(fingerprint_filter(census_id, fingerprints), None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count_conflicting_participants(
        &self,
        census_id: &str,
        participant_id: &str,
        fingerprints: &[String],
    ) -> Result<u64, SyncError> {
        if fingerprints.is_empty() {
            return Ok(0);
        }
        let mut filter = fingerprint_filter(census_id, fingerprints);
        filter.insert("participant_id", doc! { "$ne": participant_id });
        Ok(self.participants().count_documents(filter, None).await?)
    }

    async fn count_participants(&self, census_id: &str) -> Result<u64, SyncError> {
        Ok(self
            .participants()
            .count_documents(doc! { "census_id": census_id }, None)
            .await?)
    }

    async fn upsert_participants(
        &self,
        _census_id: &str,
        upserts: &[ParticipantUpsert],
    ) -> Result<WriteSummary, SyncError> {
        let statements = upserts.iter().map(participant_statement).collect();
        self.grouped_update(PARTICIPANTS, statements).await
    }

    async fn delete_participants(
        &self,
        census_id: &str,
        participant_ids: &[String],
    ) -> Result<u64, SyncError> {
        let result = self
            .participants()
            .delete_many(
                doc! { "census_id": census_id, "participant_id": { "$in": participant_ids.to_vec() } },
                None,
            )
            .await?;
        Ok(result.deleted_count)
    }

    async fn delete_participants_by_members(
        &self,
        participant_ids: &[String],
    ) -> Result<u64, SyncError> {
        let result = self
            .participants()
            .delete_many(
                doc! { "participant_id": { "$in": participant_ids.to_vec() } },
                None,
            )
            .await?;
        Ok(result.deleted_count)
    }
}
