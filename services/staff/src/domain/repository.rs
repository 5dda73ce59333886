#![allow(async_fn_in_trait)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_domain::id::{RecordId, TenantId};

use crate::domain::legacy::LegacyRecord;
use crate::domain::types::{AggregateDocument, AggregateRecord, GlobalKey, KeyChanges, StoreKind};
use crate::error::StaffServiceError;

/// Persistence for one store kind's aggregate documents, plus the global key
/// index their records claim.
pub trait AggregateRepository<R: AggregateRecord>: Send + Sync {
    /// Fails if the backing store is unreachable.
    async fn ping(&self) -> Result<(), StaffServiceError>;

    async fn find(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<AggregateDocument<R>>, StaffServiceError>;

    /// Store `doc` unless the tenant already has a document, and return
    /// whichever document is stored afterwards.
    async fn insert_if_absent(
        &self,
        doc: &AggregateDocument<R>,
    ) -> Result<AggregateDocument<R>, StaffServiceError>;

    /// Compare-and-swap write. Succeeds only if the stored version still
    /// equals `doc.version`, and returns the new version. `keys` are applied
    /// in the same atomic unit; a key claimed by another tenant's record fails
    /// the whole save with that key's duplicate error.
    async fn save(
        &self,
        doc: &AggregateDocument<R>,
        keys: &KeyChanges,
    ) -> Result<i64, StaffServiceError>;

    /// Tenant whose document embeds `record_id`.
    async fn find_tenant_of(
        &self,
        record_id: RecordId,
    ) -> Result<Option<TenantId>, StaffServiceError>;

    async fn key_owner(&self, key: &GlobalKey) -> Result<Option<RecordId>, StaffServiceError>;

    /// Record count per tenant, over every stored document.
    async fn record_counts(&self) -> Result<BTreeMap<TenantId, u64>, StaffServiceError>;

    /// Delete a tenant's document and release its keys. Returns `true` if a
    /// document was deleted.
    async fn delete(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError>;

    /// Delete every document tagged with `run_id`, releasing their keys.
    async fn delete_by_migration_run(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<TenantId>, StaffServiceError>;

    /// Tenants whose documents embed at least one record tagged with
    /// `run_id`.
    async fn tenants_with_run_records(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<TenantId>, StaffServiceError>;
}

/// Tenant directory owned by the tenant management service.
pub trait TenantDirectory: Send + Sync {
    /// Fails if the directory is unreachable.
    async fn ping(&self) -> Result<(), StaffServiceError>;

    async fn exists(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError>;
}

/// Reference to one backup snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHandle {
    pub id: Uuid,
    pub store_kind: StoreKind,
    /// `None` when the backup covers every tenant.
    pub tenant_id: Option<TenantId>,
    pub record_count: u64,
    pub created_at: DateTime<Utc>,
}

/// External store for pre-migration snapshots.
pub trait BackupSink: Send + Sync {
    /// Snapshot `records` under `id`, which is also the migration run id.
    async fn write<L: Serialize + Sync>(
        &self,
        id: Uuid,
        store_kind: StoreKind,
        tenant_id: Option<TenantId>,
        records: &[L],
    ) -> Result<BackupHandle, StaffServiceError>;

    async fn read<L: DeserializeOwned>(
        &self,
        handle: &BackupHandle,
    ) -> Result<Vec<L>, StaffServiceError>;

    async fn open(&self, id: Uuid) -> Result<Option<BackupHandle>, StaffServiceError>;
}

/// A legacy one-row-per-entity collection.
pub trait LegacySource: Send + Sync {
    type Record: LegacyRecord;

    async fn ping(&self) -> Result<(), StaffServiceError>;

    /// Legacy row count per tenant, restricted to `scope` when given.
    async fn count_by_tenant(
        &self,
        scope: Option<TenantId>,
    ) -> Result<BTreeMap<TenantId, u64>, StaffServiceError>;

    /// Rows for one tenant, oldest first.
    async fn load_tenant(&self, tenant_id: TenantId)
    -> Result<Vec<Self::Record>, StaffServiceError>;

    async fn load_all(
        &self,
        scope: Option<TenantId>,
    ) -> Result<Vec<Self::Record>, StaffServiceError>;

    /// Replace every row in `scope` with `records`.
    async fn restore(
        &self,
        scope: Option<TenantId>,
        records: &[Self::Record],
    ) -> Result<(), StaffServiceError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
