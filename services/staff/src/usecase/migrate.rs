#![allow(async_fn_in_trait)]

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use marquee_domain::id::TenantId;

use crate::domain::legacy::LegacyRecord;
use crate::domain::repository::{BackupHandle, BackupSink, LegacySource};
use crate::domain::types::{AggregateDocument, AggregateRecord, DiscardedRun};
use crate::error::StaffServiceError;

/// A store the migration runner can convert legacy rows into.
///
/// Imports go through the store's regular append path, so migrated records
/// obey the same uniqueness and protection rules as live writes.
pub trait MigrationTarget: Send + Sync {
    type Record: AggregateRecord;
    type Legacy: LegacyRecord;

    /// Natural keys of an embedded record. A legacy row sharing any of them
    /// is treated as already migrated.
    fn record_keys(record: &Self::Record) -> Vec<String>;

    /// Natural keys of a legacy row, in the same format as `record_keys`.
    fn legacy_keys(legacy: &Self::Legacy) -> Vec<String>;

    /// Fails if the aggregate store or the tenant directory is unreachable.
    async fn ping(&self) -> Result<(), StaffServiceError>;

    async fn document(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<AggregateDocument<Self::Record>>, StaffServiceError>;

    /// Append one legacy row to the tenant's document, creating the document
    /// tagged with `run_id` if it does not exist yet.
    async fn import(
        &self,
        tenant_id: TenantId,
        run_id: Uuid,
        legacy: &Self::Legacy,
    ) -> Result<Self::Record, StaffServiceError>;

    async fn migrated_counts(&self) -> Result<BTreeMap<TenantId, u64>, StaffServiceError>;

    /// Delete every document created by `run_id` and every record it
    /// appended to documents that already existed.
    async fn discard_run(&self, run_id: Uuid) -> Result<DiscardedRun, StaffServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Verifying,
    BackingUp,
    Converting,
    VerifyingIntegrity,
    RollingBack,
    Done,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Verifying => "verifying",
            Self::BackingUp => "backing_up",
            Self::Converting => "converting",
            Self::VerifyingIntegrity => "verifying_integrity",
            Self::RollingBack => "rolling_back",
            Self::Done => "done",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Count what would be imported without writing anything.
    pub dry_run: bool,
    pub create_backup: bool,
    /// Restrict the run to one tenant.
    pub tenant_id: Option<TenantId>,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            create_backup: true,
            tenant_id: None,
        }
    }
}

/// Legacy row counts gathered before converting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    pub legacy_counts: BTreeMap<TenantId, u64>,
}

impl SetupReport {
    pub fn total(&self) -> u64 {
        self.legacy_counts.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantOutcome {
    pub tenant_id: TenantId,
    pub imported: u64,
    pub skipped: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantMismatch {
    pub tenant_id: TenantId,
    pub original: u64,
    pub migrated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub original_count: u64,
    pub migrated_count: u64,
    pub mismatches: Vec<TenantMismatch>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.original_count == self.migrated_count && self.mismatches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub phases: Vec<MigrationPhase>,
    pub backup: Option<BackupHandle>,
    pub tenants: Vec<TenantOutcome>,
    pub integrity: Option<IntegrityReport>,
}

impl MigrationReport {
    pub fn tenants_attempted(&self) -> usize {
        self.tenants.len()
    }

    pub fn tenants_migrated(&self) -> usize {
        self.tenants.iter().filter(|t| t.error.is_none()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.tenants.iter().filter(|t| t.error.is_some()).count()
    }

    pub fn records_imported(&self) -> u64 {
        self.tenants.iter().map(|t| t.imported).sum()
    }

    pub fn records_skipped(&self) -> u64 {
        self.tenants.iter().map(|t| t.skipped).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub backup_id: Uuid,
    pub documents_deleted: Vec<TenantId>,
    pub records_removed: u64,
    pub records_restored: u64,
}

/// Converts a legacy one-row-per-entity collection into aggregate
/// documents.
///
/// Phases run `Verifying -> BackingUp -> Converting -> VerifyingIntegrity ->
/// Done`; `RollingBack` is entered when every tenant fails and a backup
/// exists, or on an explicit [`MigrationRunner::rollback`].
pub struct MigrationRunner<T, L, B> {
    pub target: T,
    pub legacy: L,
    pub backups: B,
}

impl<T, L, B> MigrationRunner<T, L, B>
where
    T: MigrationTarget,
    L: LegacySource<Record = T::Legacy>,
    B: BackupSink,
{
    pub async fn migrate(
        &self,
        options: MigrateOptions,
    ) -> Result<MigrationReport, StaffServiceError> {
        let store = <T::Record as AggregateRecord>::KIND;
        let mut report = MigrationReport {
            run_id: Uuid::now_v7(),
            dry_run: options.dry_run,
            phases: Vec::new(),
            backup: None,
            tenants: Vec::new(),
            integrity: None,
        };

        enter(&mut report, MigrationPhase::Verifying);
        let setup = self.verify_setup(options.tenant_id).await?;
        if setup.legacy_counts.is_empty() {
            enter(&mut report, MigrationPhase::Done);
            return Ok(report);
        }

        if options.create_backup && !options.dry_run {
            enter(&mut report, MigrationPhase::BackingUp);
            report.backup = Some(self.create_backup(report.run_id, options.tenant_id).await?);
        }

        enter(&mut report, MigrationPhase::Converting);
        for &tenant_id in setup.legacy_counts.keys() {
            let outcome = self
                .convert(tenant_id, report.run_id, options.dry_run)
                .await;
            if let Some(reason) = &outcome.error {
                error!(tenant_id = %tenant_id, store = %store, error = %reason, "tenant conversion failed");
            }
            report.tenants.push(outcome);
        }

        if !options.dry_run && report.tenants_migrated() == 0 {
            let reason = format!(
                "all {} tenants failed to convert",
                report.tenants_attempted()
            );
            enter(&mut report, MigrationPhase::RollingBack);
            self.target.discard_run(report.run_id).await?;
            if let Some(handle) = &report.backup {
                self.restore(handle).await?;
            }
            return Err(StaffServiceError::ConversionFailure { reason });
        }
        if report.failed_count() > 0 {
            warn!(
                store = %store,
                failed = report.failed_count(),
                attempted = report.tenants_attempted(),
                "migration finished with failed tenants"
            );
        }

        if !options.dry_run {
            enter(&mut report, MigrationPhase::VerifyingIntegrity);
            report.integrity = Some(self.verify_migration(options.tenant_id).await?);
        }
        enter(&mut report, MigrationPhase::Done);
        Ok(report)
    }

    /// Confirm the legacy collection, the aggregate store and the tenant
    /// directory are reachable, and count legacy rows per tenant.
    pub async fn verify_setup(
        &self,
        scope: Option<TenantId>,
    ) -> Result<SetupReport, StaffServiceError> {
        self.legacy.ping().await?;
        self.target.ping().await?;
        let legacy_counts = self.legacy.count_by_tenant(scope).await?;
        if legacy_counts.is_empty() {
            info!(
                store = %<T::Record as AggregateRecord>::KIND,
                "legacy collection is empty, nothing to migrate"
            );
        }
        Ok(SetupReport { legacy_counts })
    }

    /// Snapshot every legacy row in scope before anything is written.
    pub async fn create_backup(
        &self,
        run_id: Uuid,
        scope: Option<TenantId>,
    ) -> Result<BackupHandle, StaffServiceError> {
        let backup_failure = |e: StaffServiceError| StaffServiceError::BackupFailure {
            reason: e.to_string(),
        };
        let rows = self.legacy.load_all(scope).await.map_err(backup_failure)?;
        let handle = self
            .backups
            .write(run_id, <T::Record as AggregateRecord>::KIND, scope, &rows)
            .await
            .map_err(backup_failure)?;
        info!(backup_id = %handle.id, records = handle.record_count, "created migration backup");
        Ok(handle)
    }

    /// Convert one tenant's legacy rows. Failures are captured in the
    /// outcome rather than returned.
    pub async fn convert(&self, tenant_id: TenantId, run_id: Uuid, dry_run: bool) -> TenantOutcome {
        let mut outcome = TenantOutcome {
            tenant_id,
            imported: 0,
            skipped: 0,
            error: None,
        };
        if let Err(e) = self
            .convert_rows(tenant_id, run_id, dry_run, &mut outcome)
            .await
        {
            outcome.error = Some(e.to_string());
        }
        outcome
    }

    async fn convert_rows(
        &self,
        tenant_id: TenantId,
        run_id: Uuid,
        dry_run: bool,
        outcome: &mut TenantOutcome,
    ) -> Result<(), StaffServiceError> {
        let rows = self.legacy.load_tenant(tenant_id).await?;
        let mut index: HashSet<String> = self
            .target
            .document(tenant_id)
            .await?
            .map(|doc| doc.records.iter().flat_map(T::record_keys).collect())
            .unwrap_or_default();

        for row in &rows {
            let keys = T::legacy_keys(row);
            if keys.iter().any(|k| index.contains(k)) {
                outcome.skipped += 1;
                continue;
            }
            if dry_run {
                index.extend(keys);
            } else {
                let record = self.target.import(tenant_id, run_id, row).await?;
                index.extend(T::record_keys(&record));
            }
            outcome.imported += 1;
        }
        Ok(())
    }

    /// Compare legacy row counts with embedded record counts. Mismatches are
    /// reported, never corrected.
    pub async fn verify_migration(
        &self,
        scope: Option<TenantId>,
    ) -> Result<IntegrityReport, StaffServiceError> {
        let original = self.legacy.count_by_tenant(scope).await?;
        let migrated: BTreeMap<TenantId, u64> = self
            .target
            .migrated_counts()
            .await?
            .into_iter()
            .filter(|(tenant_id, _)| scope.is_none_or(|s| s == *tenant_id))
            .collect();

        let tenants: HashSet<TenantId> = original.keys().chain(migrated.keys()).copied().collect();
        let mut mismatches: Vec<TenantMismatch> = tenants
            .into_iter()
            .filter_map(|tenant_id| {
                let original = original.get(&tenant_id).copied().unwrap_or(0);
                let migrated = migrated.get(&tenant_id).copied().unwrap_or(0);
                (original != migrated).then_some(TenantMismatch {
                    tenant_id,
                    original,
                    migrated,
                })
            })
            .collect();
        mismatches.sort_by_key(|m| m.tenant_id);

        let report = IntegrityReport {
            original_count: original.values().sum(),
            migrated_count: migrated.values().sum(),
            mismatches,
        };
        if !report.is_consistent() {
            warn!(
                store = %<T::Record as AggregateRecord>::KIND,
                original = report.original_count,
                migrated = report.migrated_count,
                mismatched_tenants = report.mismatches.len(),
                "migration integrity mismatch"
            );
        }
        Ok(report)
    }

    /// Remove everything the backup's run wrote and restore the legacy rows
    /// verbatim.
    pub async fn rollback(&self, handle: &BackupHandle) -> Result<RollbackReport, StaffServiceError> {
        let store = <T::Record as AggregateRecord>::KIND;
        if handle.store_kind != store {
            return Err(StaffServiceError::InvalidInput(format!(
                "backup {} belongs to the {} store, not {store}",
                handle.id, handle.store_kind
            )));
        }
        info!(backup_id = %handle.id, phase = %MigrationPhase::RollingBack, "migration phase");
        let discarded = self.target.discard_run(handle.id).await?;
        let records_restored = self.restore(handle).await?;
        info!(
            backup_id = %handle.id,
            documents = discarded.documents_deleted.len(),
            removed = discarded.records_removed,
            restored = records_restored,
            "rolled back migration"
        );
        Ok(RollbackReport {
            backup_id: handle.id,
            documents_deleted: discarded.documents_deleted,
            records_removed: discarded.records_removed,
            records_restored,
        })
    }

    async fn restore(&self, handle: &BackupHandle) -> Result<u64, StaffServiceError> {
        let rows: Vec<T::Legacy> = self.backups.read(handle).await?;
        self.legacy.restore(handle.tenant_id, &rows).await?;
        Ok(rows.len() as u64)
    }
}

fn enter(report: &mut MigrationReport, phase: MigrationPhase) {
    info!(run_id = %report.run_id, phase = %phase, "migration phase");
    report.phases.push(phase);
}
