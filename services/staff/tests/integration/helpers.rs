use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use marquee_domain::id::TenantId;
use marquee_staff::config::StoreSettings;
use marquee_staff::domain::legacy::{LegacyRecord, LegacyRole, LegacyUser};
use marquee_staff::domain::repository::{
    BackupHandle, BackupSink, Clock, LegacySource, TenantDirectory,
};
use marquee_staff::domain::role::{Permission, Role};
use marquee_staff::domain::types::StoreKind;
use marquee_staff::domain::user::{PIN_SPACE, User};
use marquee_staff::error::StaffServiceError;
use marquee_staff::infra::memory::MemoryAggregateRepository;
use marquee_staff::usecase::pin::{PinSource, RandomPin};
use marquee_staff::usecase::role::RoleStore;
use marquee_staff::usecase::user::UserStore;

// ── MockTenants ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MockTenants {
    pub known: Arc<Mutex<HashSet<TenantId>>>,
    pub unreachable: Arc<AtomicBool>,
}

impl MockTenants {
    pub fn new(tenants: &[TenantId]) -> Self {
        Self {
            known: Arc::new(Mutex::new(tenants.iter().copied().collect())),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl TenantDirectory for MockTenants {
    async fn ping(&self) -> Result<(), StaffServiceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StaffServiceError::Internal(anyhow::anyhow!(
                "tenant directory unreachable"
            )));
        }
        Ok(())
    }

    async fn exists(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError> {
        Ok(self.known.lock().unwrap().contains(&tenant_id))
    }
}

// ── FixedClock ───────────────────────────────────────────────────────────────

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ── CyclingPin ───────────────────────────────────────────────────────────────

/// Walks the first `space` PINs in order, wrapping around.
pub struct CyclingPin {
    pub next: AtomicU32,
    pub space: u32,
}

impl CyclingPin {
    pub fn new(space: u32) -> Self {
        Self {
            next: AtomicU32::new(0),
            space: space.min(PIN_SPACE),
        }
    }
}

impl PinSource for CyclingPin {
    fn candidate(&self) -> String {
        format!("{:04}", self.next.fetch_add(1, Ordering::SeqCst) % self.space)
    }
}

// ── MockLegacySource ─────────────────────────────────────────────────────────

pub struct MockLegacySource<L> {
    pub rows: Arc<Mutex<Vec<L>>>,
}

impl<L: LegacyRecord> MockLegacySource<L> {
    pub fn new(rows: Vec<L>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
        }
    }

    /// Shared handle to the rows for inspection after a run.
    pub fn rows_handle(&self) -> Arc<Mutex<Vec<L>>> {
        Arc::clone(&self.rows)
    }

    fn in_scope(row: &L, scope: Option<TenantId>) -> bool {
        scope.is_none_or(|t| row.tenant_id() == t)
    }
}

impl<L: LegacyRecord> LegacySource for MockLegacySource<L> {
    type Record = L;

    async fn ping(&self) -> Result<(), StaffServiceError> {
        Ok(())
    }

    async fn count_by_tenant(
        &self,
        scope: Option<TenantId>,
    ) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
        let mut counts = BTreeMap::new();
        for row in self.rows.lock().unwrap().iter() {
            if Self::in_scope(row, scope) {
                *counts.entry(row.tenant_id()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<L>, StaffServiceError> {
        self.load_all(Some(tenant_id)).await
    }

    async fn load_all(&self, scope: Option<TenantId>) -> Result<Vec<L>, StaffServiceError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| Self::in_scope(row, scope))
            .cloned()
            .collect())
    }

    async fn restore(
        &self,
        scope: Option<TenantId>,
        records: &[L],
    ) -> Result<(), StaffServiceError> {
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|row| !Self::in_scope(row, scope));
        rows.extend_from_slice(records);
        Ok(())
    }
}

// ── MockBackupSink ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockBackupSink {
    pub snapshots: Arc<Mutex<HashMap<Uuid, (BackupHandle, serde_json::Value)>>>,
    pub fail_writes: bool,
}

impl MockBackupSink {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }
}

impl BackupSink for MockBackupSink {
    async fn write<L: Serialize + Sync>(
        &self,
        id: Uuid,
        store_kind: StoreKind,
        tenant_id: Option<TenantId>,
        records: &[L],
    ) -> Result<BackupHandle, StaffServiceError> {
        if self.fail_writes {
            return Err(StaffServiceError::Internal(anyhow::anyhow!("disk full")));
        }
        let handle = BackupHandle {
            id,
            store_kind,
            tenant_id,
            record_count: records.len() as u64,
            created_at: Utc::now(),
        };
        let payload = serde_json::to_value(records).unwrap();
        self.snapshots
            .lock()
            .unwrap()
            .insert(id, (handle.clone(), payload));
        Ok(handle)
    }

    async fn read<L: DeserializeOwned>(
        &self,
        handle: &BackupHandle,
    ) -> Result<Vec<L>, StaffServiceError> {
        let payload = self
            .snapshots
            .lock()
            .unwrap()
            .get(&handle.id)
            .map(|(_, payload)| payload.clone())
            .ok_or_else(|| StaffServiceError::BackupFailure {
                reason: format!("backup {} not found", handle.id),
            })?;
        Ok(serde_json::from_value(payload).unwrap())
    }

    async fn open(&self, id: Uuid) -> Result<Option<BackupHandle>, StaffServiceError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(&id)
            .map(|(handle, _)| handle.clone()))
    }
}

// ── Stores ───────────────────────────────────────────────────────────────────

pub type TestRoleStore = RoleStore<MemoryAggregateRepository<Role>, MockTenants, FixedClock>;
pub type TestUserStore<S = RandomPin> =
    UserStore<MemoryAggregateRepository<User>, MockTenants, FixedClock, S>;

pub fn test_now() -> DateTime<Utc> {
    "2026-03-01T09:00:00Z".parse().unwrap()
}

pub fn test_settings() -> StoreSettings {
    StoreSettings {
        bcrypt_cost: 4,
        ..Default::default()
    }
}

pub fn role_store(tenants: &[TenantId]) -> TestRoleStore {
    RoleStore::new(
        MemoryAggregateRepository::new(),
        MockTenants::new(tenants),
        FixedClock(test_now()),
        &test_settings(),
    )
}

pub fn user_store(tenants: &[TenantId]) -> TestUserStore {
    UserStore::new(
        MemoryAggregateRepository::new(),
        MockTenants::new(tenants),
        FixedClock(test_now()),
        &test_settings(),
    )
}

// ── Legacy rows ──────────────────────────────────────────────────────────────

pub fn legacy_role(tenant_id: TenantId, name: &str, age_days: i64) -> LegacyRole {
    let created = test_now() - Duration::days(age_days);
    LegacyRole {
        id: Uuid::now_v7(),
        tenant_id: tenant_id.0,
        name: name.to_owned(),
        description: format!("{name} duties"),
        permissions: serde_json::to_value(vec![Permission::new(
            "orders",
            "Order History",
            "/theater/orders",
            true,
        )])
        .unwrap(),
        priority: 5,
        is_global: false,
        is_default: false,
        is_active: true,
        created_at: created,
        updated_at: created,
    }
}

pub fn legacy_user(tenant_id: TenantId, username: &str, pin: Option<&str>) -> LegacyUser {
    let created = test_now() - Duration::days(30);
    LegacyUser {
        id: Uuid::now_v7(),
        tenant_id: tenant_id.0,
        username: username.to_owned(),
        email: format!("{username}@{}.example", tenant_id.0.simple()),
        password_hash: "$2b$04$legacyhashlegacyhashlegacyhashlegacyhashlegacyhash12".to_owned(),
        full_name: username.to_uppercase(),
        phone_number: None,
        pin: pin.map(str::to_owned),
        role_id: None,
        is_active: true,
        is_email_verified: true,
        last_login_at: Some(created),
        created_at: created,
        updated_at: created,
    }
}
