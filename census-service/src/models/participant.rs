use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Named position of a fingerprint within a participant's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FingerprintSlot {
    Primary,
    SecondaryEmail,
    SecondaryPhone,
}

impl FingerprintSlot {
    pub const ALL: [FingerprintSlot; 3] = [
        FingerprintSlot::Primary,
        FingerprintSlot::SecondaryEmail,
        FingerprintSlot::SecondaryPhone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintSlot::Primary => "primary",
            FingerprintSlot::SecondaryEmail => "secondaryEmail",
            FingerprintSlot::SecondaryPhone => "secondaryPhone",
        }
    }

    /// Participant document field holding this slot.
    pub fn document_field(&self) -> &'static str {
        match self {
            FingerprintSlot::Primary => "login_hash",
            FingerprintSlot::SecondaryEmail => "login_hash_email",
            FingerprintSlot::SecondaryPhone => "login_hash_phone",
        }
    }
}

/// Fingerprint set of one member under one census configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    pub primary: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Fingerprints {
    pub fn get(&self, slot: FingerprintSlot) -> Option<&str> {
        match slot {
            FingerprintSlot::Primary => Some(self.primary.as_str()),
            FingerprintSlot::SecondaryEmail => self.email.as_deref(),
            FingerprintSlot::SecondaryPhone => self.phone.as_deref(),
        }
    }

    /// Present slots with their values.
    pub fn iter(&self) -> impl Iterator<Item = (FingerprintSlot, &str)> + '_ {
        FingerprintSlot::ALL
            .into_iter()
            .filter_map(move |slot| self.get(slot).map(|value| (slot, value)))
    }

    pub fn values(&self) -> Vec<String> {
        self.iter().map(|(_, value)| value.to_string()).collect()
    }
}

/// Join between a member and a census.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensusParticipant {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub participant_id: String,
    pub census_id: String,
    pub login_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hash_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hash_phone: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl CensusParticipant {
    pub fn fingerprints(&self) -> Fingerprints {
        Fingerprints {
            primary: self.login_hash.clone(),
            email: self.login_hash_email.clone(),
            phone: self.login_hash_phone.clone(),
        }
    }
}

/// Upsert keyed by (participant_id, census_id).
#[derive(Debug, Clone)]
pub struct ParticipantUpsert {
    pub participant_id: String,
    pub census_id: String,
    pub fingerprints: Fingerprints,
}
