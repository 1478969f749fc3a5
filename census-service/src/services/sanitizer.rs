//! Normalisation and privacy hashing of a single member's PII fields.
//!
//! A bad email, phone or birth date never rejects the record: the field is
//! cleared and a [`FieldWarning`] is returned alongside the member.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use phonenumber::country;
use secrecy::SecretString;
use std::sync::Arc;
use validator::ValidateEmail;

use super::error::SyncError;
use super::hashing::keyed_hash;
use super::password::PasswordHasher;
use crate::models::{FieldWarning, Member, MemberField, MemberFieldMask, RawMember};

pub const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";

/// Sanitized member together with the fields the caller is allowed to write.
#[derive(Debug, Clone)]
pub struct SanitizedMember {
    pub member: Member,
    pub mask: MemberFieldMask,
    pub warnings: Vec<FieldWarning>,
    /// True when the identity was minted during sanitization.
    pub is_new: bool,
}

#[derive(Clone)]
pub struct FieldSanitizer {
    phone_region: Option<country::Id>,
    hasher: Arc<dyn PasswordHasher>,
}

impl FieldSanitizer {
    /// `region` is an ISO 3166 code applied to numbers without a `+` prefix.
    pub fn new(region: &str, hasher: Arc<dyn PasswordHasher>) -> Self {
        let phone_region = region.trim().to_uppercase().parse::<country::Id>().ok();
        if phone_region.is_none() {
            tracing::warn!(
                region = %region,
                "Unknown default phone region, only international numbers will parse"
            );
        }
        Self {
            phone_region,
            hasher,
        }
    }

    pub fn sanitize(
        &self,
        raw: RawMember,
        org_id: &str,
        salt: &SecretString,
        now: DateTime<Utc>,
    ) -> Result<SanitizedMember, SyncError> {
        let mut warnings = Vec::new();
        let mut mask = MemberFieldMask::profile();

        let (id, is_new) = match raw.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => (id, false),
            None => (uuid::Uuid::new_v4().to_string(), true),
        };

        let email = match normalize_email(&raw.email) {
            Ok(email) => email,
            Err(reason) => {
                warnings.push(FieldWarning::new(&id, MemberField::Email, reason));
                String::new()
            }
        };

        // A supplied phone is always written, cleared when it does not parse.
        let mut hashed_phone = String::new();
        if !raw.phone.trim().is_empty() {
            mask.insert(MemberField::HashedPhone);
            match self.normalize_phone(&raw.phone) {
                Some(phone) => hashed_phone = keyed_hash(org_id, &[&phone])?,
                None => warnings.push(FieldWarning::new(
                    &id,
                    MemberField::HashedPhone,
                    "could not parse phone number",
                )),
            }
        }

        let mut hashed_password = String::new();
        if !raw.password.is_empty() {
            hashed_password = self.hasher.hash(salt, &raw.password)?;
            mask.insert(MemberField::HashedPassword);
        }

        let (birth_date, parsed_birth_date) = match parse_birth_date(&raw.birth_date) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warnings.push(FieldWarning::new(&id, MemberField::BirthDate, reason));
                (String::new(), None)
            }
        };

        let member = Member {
            id,
            org_id: org_id.to_string(),
            member_number: raw.member_number.trim().to_string(),
            name: raw.name.trim().to_string(),
            surname: raw.surname.trim().to_string(),
            national_id: raw.national_id.trim().to_string(),
            email,
            hashed_phone,
            hashed_password,
            birth_date,
            parsed_birth_date,
            other: raw.other,
            created_at: now,
            updated_at: now,
        };

        Ok(SanitizedMember {
            member,
            mask,
            warnings,
            is_new,
        })
    }

    /// E.164 form of a phone number, or `None` if it does not parse as a valid number.
    pub fn normalize_phone(&self, phone: &str) -> Option<String> {
        let number = phonenumber::parse(self.phone_region, phone.trim()).ok()?;
        if !phonenumber::is_valid(&number) {
            return None;
        }
        Some(number.format().mode(phonenumber::Mode::E164).to_string())
    }
}

fn normalize_email(email: &str) -> Result<String, &'static str> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Ok(email);
    }
    if !email.as_str().validate_email() {
        return Err("invalid email address");
    }
    Ok(email)
}

fn parse_birth_date(value: &str) -> Result<(String, Option<DateTime<Utc>>), &'static str> {
    let value = value.trim();
    if value.is_empty() {
        return Ok((String::new(), None));
    }
    let date = NaiveDate::parse_from_str(value, BIRTH_DATE_FORMAT)
        .map_err(|_| "birth date must use YYYY-MM-DD")?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or("birth date out of range")?;
    Ok((
        date.format(BIRTH_DATE_FORMAT).to_string(),
        Some(Utc.from_utc_datetime(&midnight)),
    ))
}
