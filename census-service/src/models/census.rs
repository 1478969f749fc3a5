use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Member attribute that can form the identity half of a login fingerprint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthField {
    Name,
    Surname,
    MemberNumber,
    NationalId,
    BirthDate,
}

impl AuthField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthField::Name => "name",
            AuthField::Surname => "surname",
            AuthField::MemberNumber => "member_number",
            AuthField::NationalId => "national_id",
            AuthField::BirthDate => "birth_date",
        }
    }
}

impl std::fmt::Display for AuthField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification channel used as the second factor of a login fingerprint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TwoFaField {
    Email,
    Phone,
}

impl TwoFaField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwoFaField::Email => "email",
            TwoFaField::Phone => "phone",
        }
    }
}

impl std::fmt::Display for TwoFaField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A census and its authentication field configuration. Field order is
/// significant: fingerprints are computed in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Census {
    #[serde(rename = "_id")]
    pub id: String,
    pub org_id: String,
    #[serde(default)]
    pub auth_fields: Vec<AuthField>,
    #[serde(default)]
    pub two_fa_fields: Vec<TwoFaField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Census {
    pub fn new(
        id: impl Into<String>,
        org_id: impl Into<String>,
        auth_fields: Vec<AuthField>,
        two_fa_fields: Vec<TwoFaField>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            org_id: org_id.into(),
            auth_fields,
            two_fa_fields,
            group_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when at least one field is configured, i.e. fingerprints can be derived.
    pub fn has_auth_config(&self) -> bool {
        !self.auth_fields.is_empty() || !self.two_fa_fields.is_empty()
    }

    /// Secondary single-channel fingerprints only exist when both channels are configured.
    pub fn uses_secondary_fingerprints(&self) -> bool {
        self.two_fa_fields.len() == 2
    }
}
