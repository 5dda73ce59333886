//! Rows of the legacy one-row-per-entity collections that the migration
//! runner converts into aggregate documents.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_domain::id::{RecordId, TenantId};

/// A legacy row, snapshotted verbatim into backups and restored verbatim on
/// rollback.
pub trait LegacyRecord:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn id(&self) -> Uuid;

    fn tenant_id(&self) -> TenantId;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRole {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: String,
    /// Kept as stored; parsed into a permission matrix during conversion.
    pub permissions: serde_json::Value,
    pub priority: i32,
    pub is_global: bool,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LegacyRecord for LegacyRole {
    fn id(&self) -> Uuid {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        TenantId(self.tenant_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub pin: Option<String>,
    pub role_id: Option<Uuid>,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LegacyUser {
    pub fn role_record_id(&self) -> Option<RecordId> {
        self.role_id.map(RecordId)
    }
}

impl LegacyRecord for LegacyUser {
    fn id(&self) -> Uuid {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        TenantId(self.tenant_id)
    }
}
