use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::census::{AuthField, TwoFaField};

/// Member record as supplied by an import or an edit. Carries cleartext PII
/// and is never persisted as-is.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMember {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub member_number: String,
    pub name: String,
    pub surname: String,
    pub national_id: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub birth_date: String,
    pub other: HashMap<String, String>,
}

// Cleartext contact data and passwords must never reach the logs.
impl std::fmt::Debug for RawMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMember")
            .field("id", &self.id)
            .field("member_number", &self.member_number)
            .field("email", &redacted(&self.email))
            .field("phone", &redacted(&self.phone))
            .field("password", &redacted(&self.password))
            .finish_non_exhaustive()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

impl RawMember {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Persisted member. Only hashed derivatives of the phone number and
/// password exist on this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    #[serde(default)]
    pub member_number: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub surname: String,
    #[serde(default)]
    pub national_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub hashed_phone: String,
    #[serde(default)]
    pub hashed_password: String,
    #[serde(default)]
    pub birth_date: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub parsed_birth_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub other: HashMap<String, String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

// Helper module for optional DateTime<Utc> as BSON DateTime
pub(crate) mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        Ok(opt.map(|dt| dt.to_chrono()))
    }
}

impl Member {
    /// Value of an identity field as used in fingerprints.
    pub fn auth_value(&self, field: AuthField) -> &str {
        match field {
            AuthField::Name => &self.name,
            AuthField::Surname => &self.surname,
            AuthField::MemberNumber => &self.member_number,
            AuthField::NationalId => &self.national_id,
            AuthField::BirthDate => &self.birth_date,
        }
    }

    /// Value of a verification channel. The phone channel uses the hashed phone.
    pub fn two_fa_value(&self, field: TwoFaField) -> &str {
        match field {
            TwoFaField::Email => &self.email,
            TwoFaField::Phone => &self.hashed_phone,
        }
    }

    /// Fill secrets outside `mask` from the stored record.
    pub fn merge_preserved(&mut self, stored: &Member, mask: MemberFieldMask) {
        if !mask.contains(MemberField::HashedPhone) {
            self.hashed_phone = stored.hashed_phone.clone();
        }
        if !mask.contains(MemberField::HashedPassword) {
            self.hashed_password = stored.hashed_password.clone();
        }
        self.created_at = stored.created_at;
    }

    /// Copy the fields selected by `mask` from `source`, refreshing `updated_at`.
    pub fn apply_fields(&mut self, source: &Member, mask: MemberFieldMask) {
        for field in mask.iter() {
            match field {
                MemberField::MemberNumber => self.member_number = source.member_number.clone(),
                MemberField::Name => self.name = source.name.clone(),
                MemberField::Surname => self.surname = source.surname.clone(),
                MemberField::NationalId => self.national_id = source.national_id.clone(),
                MemberField::Email => self.email = source.email.clone(),
                MemberField::HashedPhone => self.hashed_phone = source.hashed_phone.clone(),
                MemberField::HashedPassword => {
                    self.hashed_password = source.hashed_password.clone()
                }
                MemberField::BirthDate => {
                    self.birth_date = source.birth_date.clone();
                    self.parsed_birth_date = source.parsed_birth_date;
                }
                MemberField::Other => self.other = source.other.clone(),
            }
        }
        self.updated_at = source.updated_at;
    }
}

/// Mutable member attributes. The key doubles as the document field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberField {
    MemberNumber,
    Name,
    Surname,
    NationalId,
    Email,
    HashedPhone,
    HashedPassword,
    BirthDate,
    Other,
}

impl MemberField {
    pub const ALL: [MemberField; 9] = [
        MemberField::MemberNumber,
        MemberField::Name,
        MemberField::Surname,
        MemberField::NationalId,
        MemberField::Email,
        MemberField::HashedPhone,
        MemberField::HashedPassword,
        MemberField::BirthDate,
        MemberField::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberField::MemberNumber => "member_number",
            MemberField::Name => "name",
            MemberField::Surname => "surname",
            MemberField::NationalId => "national_id",
            MemberField::Email => "email",
            MemberField::HashedPhone => "hashed_phone",
            MemberField::HashedPassword => "hashed_password",
            MemberField::BirthDate => "birth_date",
            MemberField::Other => "other",
        }
    }

    fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

impl std::fmt::Display for MemberField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit set of member fields an operation is allowed to overwrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberFieldMask(u16);

impl MemberFieldMask {
    /// Plain profile fields, always rewritten on sync.
    pub fn profile() -> Self {
        [
            MemberField::MemberNumber,
            MemberField::Name,
            MemberField::Surname,
            MemberField::NationalId,
            MemberField::Email,
            MemberField::BirthDate,
            MemberField::Other,
        ]
        .into_iter()
        .collect()
    }

    pub fn insert(&mut self, field: MemberField) {
        self.0 |= field.bit();
    }

    pub fn with(mut self, field: MemberField) -> Self {
        self.insert(field);
        self
    }

    pub fn contains(&self, field: MemberField) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = MemberField> + '_ {
        MemberField::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl FromIterator<MemberField> for MemberFieldMask {
    fn from_iter<I: IntoIterator<Item = MemberField>>(iter: I) -> Self {
        let mut mask = MemberFieldMask::default();
        for field in iter {
            mask.insert(field);
        }
        mask
    }
}

/// Upsert-by-identity of one member, limited to the fields in `mask`.
/// `org_id` and `created_at` are only written when the record is inserted.
#[derive(Debug, Clone)]
pub struct MemberUpsert {
    pub member: Member,
    pub mask: MemberFieldMask,
}
