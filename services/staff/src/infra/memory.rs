use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use marquee_domain::id::{RecordId, TenantId};

use crate::domain::repository::AggregateRepository;
use crate::domain::types::{AggregateDocument, AggregateRecord, GlobalKey, KeyChanges};
use crate::error::StaffServiceError;

#[derive(Debug, Clone, Copy)]
struct KeyClaim {
    tenant_id: TenantId,
    record_id: RecordId,
}

struct Inner<R: AggregateRecord> {
    docs: HashMap<TenantId, AggregateDocument<R>>,
    keys: BTreeMap<GlobalKey, KeyClaim>,
    forced_conflicts: u32,
}

/// Process-local aggregate repository. Documents and the global key index
/// share one lock, so a save and its key claims are atomic.
///
/// Every critical section validates before it writes, so state behind a
/// poisoned lock is still consistent and is used as is.
///
/// Clones share state.
pub struct MemoryAggregateRepository<R: AggregateRecord> {
    inner: Arc<Mutex<Inner<R>>>,
}

impl<R: AggregateRecord> Clone for MemoryAggregateRepository<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: AggregateRecord> Default for MemoryAggregateRepository<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AggregateRecord> MemoryAggregateRepository<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                docs: HashMap::new(),
                keys: BTreeMap::new(),
                forced_conflicts: 0,
            })),
        }
    }

    /// Make the next `n` saves fail with a persistence conflict.
    pub fn force_conflicts(&self, n: u32) {
        self.lock().forced_conflicts = n;
    }

    /// Number of documents currently stored.
    pub fn document_count(&self) -> usize {
        self.lock().docs.len()
    }

    /// Number of claimed global keys.
    pub fn key_count(&self) -> usize {
        self.lock().keys.len()
    }

    /// Every claimed global key with the record holding it.
    pub fn claimed_keys(&self) -> BTreeMap<GlobalKey, RecordId> {
        self.lock()
            .keys
            .iter()
            .map(|(key, claim)| (key.clone(), claim.record_id))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn release_tenant_keys(keys: &mut BTreeMap<GlobalKey, KeyClaim>, tenant_id: TenantId) {
    keys.retain(|_, claim| claim.tenant_id != tenant_id);
}

impl<R: AggregateRecord> AggregateRepository<R> for MemoryAggregateRepository<R> {
    async fn ping(&self) -> Result<(), StaffServiceError> {
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<AggregateDocument<R>>, StaffServiceError> {
        Ok(self.lock().docs.get(&tenant_id).cloned())
    }

    async fn insert_if_absent(
        &self,
        doc: &AggregateDocument<R>,
    ) -> Result<AggregateDocument<R>, StaffServiceError> {
        let mut inner = self.lock();
        Ok(inner
            .docs
            .entry(doc.tenant_id)
            .or_insert_with(|| doc.clone())
            .clone())
    }

    async fn save(
        &self,
        doc: &AggregateDocument<R>,
        keys: &KeyChanges,
    ) -> Result<i64, StaffServiceError> {
        let mut inner = self.lock();
        let conflict = StaffServiceError::PersistenceConflict {
            tenant_id: doc.tenant_id,
        };
        if inner.forced_conflicts > 0 {
            inner.forced_conflicts -= 1;
            return Err(conflict);
        }
        let stored_version = inner
            .docs
            .get(&doc.tenant_id)
            .map(|stored| stored.version)
            .ok_or(StaffServiceError::AggregateNotFound(doc.tenant_id))?;
        if stored_version != doc.version {
            return Err(conflict);
        }

        for (key, _) in &keys.claim {
            if let Some(claim) = inner.keys.get(key) {
                if claim.tenant_id != doc.tenant_id {
                    return Err(key.kind.duplicate_error(&key.value));
                }
            }
        }
        for key in &keys.release {
            if inner
                .keys
                .get(key)
                .is_some_and(|claim| claim.tenant_id == doc.tenant_id)
            {
                inner.keys.remove(key);
            }
        }
        for (key, record_id) in &keys.claim {
            inner.keys.insert(
                key.clone(),
                KeyClaim {
                    tenant_id: doc.tenant_id,
                    record_id: *record_id,
                },
            );
        }

        let mut next = doc.clone();
        next.version += 1;
        let version = next.version;
        inner.docs.insert(doc.tenant_id, next);
        Ok(version)
    }

    async fn find_tenant_of(
        &self,
        record_id: RecordId,
    ) -> Result<Option<TenantId>, StaffServiceError> {
        let inner = self.lock();
        Ok(inner
            .docs
            .values()
            .find(|doc| doc.find(record_id).is_some())
            .map(|doc| doc.tenant_id))
    }

    async fn key_owner(&self, key: &GlobalKey) -> Result<Option<RecordId>, StaffServiceError> {
        Ok(self.lock().keys.get(key).map(|claim| claim.record_id))
    }

    async fn record_counts(&self) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
        let inner = self.lock();
        Ok(inner
            .docs
            .values()
            .map(|doc| (doc.tenant_id, doc.records.len() as u64))
            .collect())
    }

    async fn delete(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError> {
        let mut inner = self.lock();
        let deleted = inner.docs.remove(&tenant_id).is_some();
        release_tenant_keys(&mut inner.keys, tenant_id);
        Ok(deleted)
    }

    async fn delete_by_migration_run(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<TenantId>, StaffServiceError> {
        let mut inner = self.lock();
        let tenants: Vec<TenantId> = inner
            .docs
            .values()
            .filter(|doc| doc.migration_run_id == Some(run_id))
            .map(|doc| doc.tenant_id)
            .collect();
        for tenant_id in &tenants {
            inner.docs.remove(tenant_id);
            release_tenant_keys(&mut inner.keys, *tenant_id);
        }
        Ok(tenants)
    }

    async fn tenants_with_run_records(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<TenantId>, StaffServiceError> {
        let inner = self.lock();
        let mut tenants: Vec<TenantId> = inner
            .docs
            .values()
            .filter(|doc| {
                doc.records
                    .iter()
                    .any(|r| r.meta().migration_run_id == Some(run_id))
            })
            .map(|doc| doc.tenant_id)
            .collect();
        tenants.sort_unstable();
        Ok(tenants)
    }
}
