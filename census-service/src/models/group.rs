use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named subset of an organization's member pool. Censuses can be
/// published from a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberGroup {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl MemberGroup {
    pub fn new(id: impl Into<String>, org_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            org_id: org_id.into(),
            title: title.into(),
            member_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
