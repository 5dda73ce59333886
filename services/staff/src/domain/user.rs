use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marquee_domain::id::RecordId;
use marquee_domain::text::{contains_normalized, normalize_required};

use crate::domain::types::{AggregateRecord, GlobalKey, RecordMeta, StoreKind};
use crate::error::StaffServiceError;

pub const PIN_LENGTH: usize = 4;

/// Number of distinct PINs (`"0000"`..=`"9999"`).
pub const PIN_SPACE: u32 = 10_u32.pow(PIN_LENGTH as u32);

pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit())
}

pub fn validate_pin(pin: &str) -> Result<(), StaffServiceError> {
    if is_valid_pin(pin) {
        return Ok(());
    }
    Err(StaffServiceError::InvalidInput(format!(
        "pin must be exactly {PIN_LENGTH} digits"
    )))
}

/// Normalize and validate an email address.
pub fn normalize_email(raw: &str) -> Result<String, StaffServiceError> {
    let email = normalize_required("email", raw)?;
    let invalid = || StaffServiceError::InvalidInput(format!("malformed email {raw:?}"));
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }
    Ok(email)
}

/// A staff user embedded in a tenant's user aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub username: String,
    pub normalized_username: String,
    /// Stored normalized; unique across every tenant.
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    /// Unique across every tenant.
    pub pin: String,
    pub role_id: Option<RecordId>,
    pub is_email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Caller-facing create request. `password` is plaintext and is hashed by
/// the store; `pin` is issued when absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UserDraft {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: String,
    pub phone_number: Option<String>,
    pub pin: Option<String>,
    pub role_id: Option<RecordId>,
}

/// Fully resolved user fields, ready to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub pin: String,
    pub role_id: Option<RecordId>,
    pub is_email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn build(new: NewUser, meta: RecordMeta) -> Result<Self, StaffServiceError> {
        let normalized_username = normalize_required("username", &new.username)?;
        let email = normalize_email(&new.email)?;
        validate_pin(&new.pin)?;
        Ok(Self {
            meta,
            username: new.username.trim().to_owned(),
            normalized_username,
            email,
            password_hash: new.password_hash,
            full_name: new.full_name,
            phone_number: new.phone_number,
            pin: new.pin,
            role_id: new.role_id,
            is_email_verified: new.is_email_verified,
            last_login_at: new.last_login_at,
        })
    }

    /// Apply a patch. `password_hash` is the hash of `patch.password`, when
    /// one was supplied. Nothing is modified on error.
    pub fn apply_patch(
        &mut self,
        patch: &UserPatch,
        password_hash: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StaffServiceError> {
        if patch.is_empty() {
            return Err(StaffServiceError::InvalidInput(
                "user patch has no fields".to_owned(),
            ));
        }
        let normalized_username = match &patch.username {
            Some(username) => Some(normalize_required("username", username)?),
            None => None,
        };
        let email = match &patch.email {
            Some(email) => Some(normalize_email(email)?),
            None => None,
        };
        if patch.password.is_some() && password_hash.is_none() {
            return Err(StaffServiceError::Internal(anyhow::anyhow!(
                "password supplied without a hash"
            )));
        }

        if let (Some(username), Some(normalized)) = (&patch.username, normalized_username) {
            self.username = username.trim().to_owned();
            self.normalized_username = normalized;
        }
        if let Some(email) = email {
            if email != self.email {
                self.is_email_verified = false;
            }
            self.email = email;
        }
        if let Some(hash) = password_hash {
            self.password_hash = hash;
        }
        if let Some(full_name) = &patch.full_name {
            self.full_name = full_name.clone();
        }
        if let Some(phone_number) = &patch.phone_number {
            self.phone_number = Some(phone_number.clone()).filter(|p| !p.trim().is_empty());
        }
        if let Some(role_id) = patch.role_id {
            self.role_id = Some(role_id);
        }
        if let Some(verified) = patch.is_email_verified {
            self.is_email_verified = verified;
        }
        if let Some(is_active) = patch.is_active {
            self.meta.is_active = is_active;
        }
        self.meta.updated_at = now;
        Ok(())
    }
}

/// Partial update of a user. PINs change only through re-issue.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
    /// An empty string clears the number.
    pub phone_number: Option<String>,
    pub role_id: Option<RecordId>,
    pub is_email_verified: Option<bool>,
    pub is_active: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.full_name.is_none()
            && self.phone_number.is_none()
            && self.role_id.is_none()
            && self.is_email_verified.is_none()
            && self.is_active.is_none()
    }
}

/// User aggregate counters, recomputed on every save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub total_users: u64,
    pub active_users: u64,
    pub inactive_users: u64,
    pub verified_users: u64,
}

impl AggregateRecord for User {
    type Summary = UserSummary;

    const KIND: StoreKind = StoreKind::User;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn unique_key(&self) -> &str {
        &self.normalized_username
    }

    fn duplicate_error(&self) -> StaffServiceError {
        StaffServiceError::DuplicateUsername {
            username: self.username.clone(),
        }
    }

    // Soft-deleted users keep their claims; only hard delete frees them.
    fn global_keys(&self) -> Vec<GlobalKey> {
        vec![GlobalKey::pin(&self.pin), GlobalKey::email(&self.email)]
    }

    fn matches_search(&self, needle: &str) -> bool {
        self.normalized_username.contains(needle) || contains_normalized(&self.full_name, needle)
    }

    fn display_order(&self, other: &Self) -> Ordering {
        self.normalized_username
            .cmp(&other.normalized_username)
            .then_with(|| self.meta.sort_position.cmp(&other.meta.sort_position))
    }

    fn summarize(records: &[Self]) -> UserSummary {
        let active = records.iter().filter(|u| u.meta.is_active).count() as u64;
        UserSummary {
            total_users: records.len() as u64,
            active_users: active,
            inactive_users: records.len() as u64 - active,
            verified_users: records.iter().filter(|u| u.is_email_verified).count() as u64,
        }
    }
}
