use std::collections::BTreeMap;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use marquee_domain::id::{RecordId, TenantId};
use marquee_domain::pagination::Sort;
use marquee_domain::text::normalize_key;

use crate::domain::repository::{AggregateRepository, Clock, TenantDirectory};
use crate::domain::types::{
    AggregateDocument, AggregateRecord, DiscardedRun, GlobalKey, KeyChanges, ListQuery, RecordMeta,
    RecordPage, RecordSeed,
};
use crate::error::StaffServiceError;

/// What a write does when the tenant has no document yet.
#[derive(Debug, Clone, Copy)]
enum WhenMissing {
    Fail,
    Create { migration_run_id: Option<Uuid> },
}

/// Generic load-validate-mutate-save engine over one store kind's
/// aggregate documents.
///
/// Every write re-runs its whole step against a freshly loaded document when
/// the repository reports a lost compare-and-swap, up to `conflict_retries`
/// extra times.
pub struct AggregateStore<R, P, D, C> {
    pub repo: P,
    pub tenants: D,
    pub clock: C,
    pub conflict_retries: u32,
    _record: PhantomData<fn() -> R>,
}

impl<R, P, D, C> AggregateStore<R, P, D, C>
where
    R: AggregateRecord,
    P: AggregateRepository<R>,
    D: TenantDirectory,
    C: Clock,
{
    pub fn new(repo: P, tenants: D, clock: C, conflict_retries: u32) -> Self {
        Self {
            repo,
            tenants,
            clock,
            conflict_retries,
            _record: PhantomData,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Return the tenant's document, creating an empty one if none exists.
    /// Concurrent calls for one tenant converge on a single document.
    pub async fn find_or_create(
        &self,
        tenant_id: TenantId,
    ) -> Result<AggregateDocument<R>, StaffServiceError> {
        self.find_or_create_tagged(tenant_id, None).await
    }

    pub(crate) async fn find_or_create_tagged(
        &self,
        tenant_id: TenantId,
        migration_run_id: Option<Uuid>,
    ) -> Result<AggregateDocument<R>, StaffServiceError> {
        if let Some(doc) = self.repo.find(tenant_id).await? {
            return Ok(doc);
        }
        if !self.tenants.exists(tenant_id).await? {
            return Err(StaffServiceError::TenantNotFound(tenant_id));
        }
        let fresh = AggregateDocument::empty(tenant_id, self.clock.now(), migration_run_id);
        let stored = self.repo.insert_if_absent(&fresh).await?;
        if stored.id == fresh.id {
            info!(
                tenant_id = %tenant_id,
                store = %R::KIND,
                "created aggregate document"
            );
        }
        Ok(stored)
    }

    pub async fn load(&self, tenant_id: TenantId) -> Result<AggregateDocument<R>, StaffServiceError> {
        self.repo
            .find(tenant_id)
            .await?
            .ok_or(StaffServiceError::AggregateNotFound(tenant_id))
    }

    /// Filter, sort and paginate one tenant's records. A tenant without a
    /// document lists as empty; reads never create documents.
    pub async fn list_records(
        &self,
        tenant_id: TenantId,
        query: &ListQuery,
    ) -> Result<RecordPage<R>, StaffServiceError> {
        let (records, summary) = match self.repo.find(tenant_id).await? {
            Some(doc) => (doc.records, doc.summary),
            None => (Vec::new(), R::Summary::default()),
        };
        let needle = query
            .search
            .as_deref()
            .map(normalize_key)
            .filter(|n| !n.is_empty());

        let mut matching: Vec<R> = records
            .into_iter()
            .filter(|r| query.is_active.is_none_or(|active| r.is_active() == active))
            .filter(|r| needle.as_deref().is_none_or(|n| r.matches_search(n)))
            .collect();
        matching.sort_by(|a, b| a.display_order(b));
        if query.order == Some(Sort::Desc) {
            matching.reverse();
        }

        let (records, pagination) = query.page.clamped().slice(&matching);
        Ok(RecordPage {
            records,
            pagination,
            summary,
        })
    }

    /// Append a record built from `seed`. `build` receives the assigned
    /// identity, timestamps and sort position and may reject the draft.
    pub async fn append_record<F>(
        &self,
        tenant_id: TenantId,
        seed: RecordSeed,
        build: F,
    ) -> Result<R, StaffServiceError>
    where
        F: Fn(RecordMeta) -> Result<R, StaffServiceError>,
    {
        self.append_tagged(tenant_id, None, seed, build).await
    }

    pub(crate) async fn append_tagged<F>(
        &self,
        tenant_id: TenantId,
        migration_run_id: Option<Uuid>,
        seed: RecordSeed,
        build: F,
    ) -> Result<R, StaffServiceError>
    where
        F: Fn(RecordMeta) -> Result<R, StaffServiceError>,
    {
        // Fix the id up front so every retry appends the same record.
        let id = seed.id.unwrap_or_default();
        let seed = RecordSeed {
            id: Some(id),
            migration_run_id,
            ..seed
        };
        self.modify(
            tenant_id,
            WhenMissing::Create { migration_run_id },
            |doc, now| {
                if doc.find(id).is_some() {
                    return Err(StaffServiceError::InvalidInput(format!(
                        "record {id} already exists"
                    )));
                }
                let position = doc.take_sort_position();
                let record = build(seed.into_meta(now, position))?;
                doc.check_unique(&record)?;
                doc.records.push(record.clone());
                Ok(record)
            },
        )
        .await
    }

    /// Apply `change` to one record. The record is only replaced when
    /// `change` succeeds and the result still satisfies uniqueness.
    pub async fn mutate_record<F>(
        &self,
        tenant_id: TenantId,
        record_id: RecordId,
        mut change: F,
    ) -> Result<R, StaffServiceError>
    where
        F: FnMut(&mut R, DateTime<Utc>) -> Result<(), StaffServiceError>,
    {
        self.modify(tenant_id, WhenMissing::Fail, |doc, now| {
            let position = doc
                .position(record_id)
                .ok_or_else(|| R::KIND.record_not_found(record_id))?;
            let mut record = doc.records[position].clone();
            change(&mut record, now)?;
            record.meta_mut().updated_at = now;
            doc.check_unique(&record)?;
            doc.records[position] = record.clone();
            Ok(record)
        })
        .await
    }

    /// Splice the record out (`hard`) or mark it inactive. `guard` sees the
    /// current record and may veto the removal.
    pub async fn remove_record<G>(
        &self,
        tenant_id: TenantId,
        record_id: RecordId,
        hard: bool,
        guard: G,
    ) -> Result<R, StaffServiceError>
    where
        G: Fn(&R) -> Result<(), StaffServiceError>,
    {
        self.modify(tenant_id, WhenMissing::Fail, |doc, now| {
            let position = doc
                .position(record_id)
                .ok_or_else(|| R::KIND.record_not_found(record_id))?;
            guard(&doc.records[position])?;
            if hard {
                return Ok(doc.records.remove(position));
            }
            let record = &mut doc.records[position];
            record.meta_mut().is_active = false;
            record.meta_mut().updated_at = now;
            Ok(record.clone())
        })
        .await
    }

    /// Tenant owning `record_id`, or the kind's not-found error.
    pub async fn find_owner(&self, record_id: RecordId) -> Result<TenantId, StaffServiceError> {
        self.repo
            .find_tenant_of(record_id)
            .await?
            .ok_or_else(|| R::KIND.record_not_found(record_id))
    }

    pub async fn find_record(
        &self,
        record_id: RecordId,
    ) -> Result<(TenantId, R), StaffServiceError> {
        let tenant_id = self.find_owner(record_id).await?;
        let doc = self.load(tenant_id).await?;
        let record = doc
            .find(record_id)
            .cloned()
            .ok_or_else(|| R::KIND.record_not_found(record_id))?;
        Ok((tenant_id, record))
    }

    pub async fn key_claimed(&self, key: &GlobalKey) -> Result<bool, StaffServiceError> {
        Ok(self.repo.key_owner(key).await?.is_some())
    }

    pub async fn delete_document(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError> {
        let deleted = self.repo.delete(tenant_id).await?;
        if deleted {
            info!(tenant_id = %tenant_id, store = %R::KIND, "deleted aggregate document");
        }
        Ok(deleted)
    }

    /// Undo everything `run_id` wrote: documents it created are deleted, and
    /// records it appended to pre-existing documents are spliced out through
    /// the regular save path so their global keys are released.
    pub async fn discard_migration_run(
        &self,
        run_id: Uuid,
    ) -> Result<DiscardedRun, StaffServiceError> {
        let documents_deleted = self.repo.delete_by_migration_run(run_id).await?;
        let mut records_removed = 0;
        for tenant_id in self.repo.tenants_with_run_records(run_id).await? {
            let removed = self
                .modify(tenant_id, WhenMissing::Fail, |doc, _| {
                    let before = doc.records.len();
                    doc.records
                        .retain(|r| r.meta().migration_run_id != Some(run_id));
                    Ok((before - doc.records.len()) as u64)
                })
                .await;
            match removed {
                Ok(n) => records_removed += n,
                // Torn down concurrently; nothing left to remove.
                Err(StaffServiceError::AggregateNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(
            run_id = %run_id,
            store = %R::KIND,
            documents = documents_deleted.len(),
            records = records_removed,
            "discarded migration run"
        );
        Ok(DiscardedRun {
            documents_deleted,
            records_removed,
        })
    }

    pub async fn record_counts(&self) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
        self.repo.record_counts().await
    }

    async fn modify<T, F>(
        &self,
        tenant_id: TenantId,
        when_missing: WhenMissing,
        mut step: F,
    ) -> Result<T, StaffServiceError>
    where
        F: FnMut(&mut AggregateDocument<R>, DateTime<Utc>) -> Result<T, StaffServiceError>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut doc = match when_missing {
                WhenMissing::Fail => self.load(tenant_id).await?,
                WhenMissing::Create { migration_run_id } => {
                    self.find_or_create_tagged(tenant_id, migration_run_id)
                        .await?
                }
            };
            let before = doc.global_keys()?;
            let now = self.clock.now();

            let out = step(&mut doc, now)?;
            doc.refresh_summary();
            doc.updated_at = now;
            let keys = KeyChanges::between(&before, &doc.global_keys()?);

            match self.repo.save(&doc, &keys).await {
                Ok(version) => {
                    debug!(tenant_id = %tenant_id, store = %R::KIND, version, "saved aggregate");
                    return Ok(out);
                }
                Err(StaffServiceError::PersistenceConflict { .. })
                    if attempt <= self.conflict_retries =>
                {
                    warn!(
                        tenant_id = %tenant_id,
                        store = %R::KIND,
                        attempt,
                        "aggregate modified concurrently, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
