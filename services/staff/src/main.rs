use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use sea_orm::{Database, DatabaseConnection};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use marquee_core::config::Config;
use marquee_core::tracing::init_tracing;
use marquee_domain::id::TenantId;

use marquee_staff::config::{StaffConfig, StoreSettings};
use marquee_staff::domain::repository::{BackupSink, LegacySource};
use marquee_staff::error::StaffServiceError;
use marquee_staff::infra::clock::SystemClock;
use marquee_staff::infra::db::DbAggregateRepository;
use marquee_staff::infra::legacy::{
    DbBackupSink, DbLegacyRoleSource, DbLegacyUserSource, DbTenantDirectory,
};
use marquee_staff::usecase::migrate::{MigrateOptions, MigrationRunner, MigrationTarget};
use marquee_staff::usecase::role::RoleStore;
use marquee_staff::usecase::user::UserStore;

/// Operator tooling for the staff aggregate stores.
#[derive(Debug, Parser)]
#[command(name = "staff-aggregates", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Store {
    Roles,
    Users,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert the legacy collection into per-tenant aggregate documents.
    Migrate {
        #[arg(long, value_enum)]
        store: Store,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_backup: bool,
        #[arg(long)]
        tenant: Option<TenantId>,
    },
    /// Compare legacy row counts with migrated record counts.
    Verify {
        #[arg(long, value_enum)]
        store: Store,
        #[arg(long)]
        tenant: Option<TenantId>,
    },
    /// Delete a run's documents and restore the legacy rows from its backup.
    Rollback {
        #[arg(long, value_enum)]
        store: Store,
        #[arg(long)]
        backup: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = StaffConfig::from_env().context("load staff configuration")?;
    let settings = config.store_settings();

    let db = Database::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    match cli_store(&cli.command) {
        Store::Roles => {
            let runner = MigrationRunner {
                target: RoleStore::new(
                    DbAggregateRepository::new(db.clone()),
                    DbTenantDirectory { db: db.clone() },
                    SystemClock,
                    &settings,
                ),
                legacy: DbLegacyRoleSource { db: db.clone() },
                backups: DbBackupSink { db: db.clone() },
            };
            execute(&runner, cli.command).await
        }
        Store::Users => {
            let runner = MigrationRunner {
                target: user_store(&db, &settings),
                legacy: DbLegacyUserSource { db: db.clone() },
                backups: DbBackupSink { db: db.clone() },
            };
            execute(&runner, cli.command).await
        }
    }
}

fn cli_store(command: &Command) -> Store {
    match command {
        Command::Migrate { store, .. }
        | Command::Verify { store, .. }
        | Command::Rollback { store, .. } => *store,
    }
}

fn user_store(
    db: &DatabaseConnection,
    settings: &StoreSettings,
) -> UserStore<
    DbAggregateRepository<marquee_staff::domain::user::User>,
    DbTenantDirectory,
    SystemClock,
> {
    UserStore::new(
        DbAggregateRepository::new(db.clone()),
        DbTenantDirectory { db: db.clone() },
        SystemClock,
        settings,
    )
}

async fn execute<T, L, B>(
    runner: &MigrationRunner<T, L, B>,
    command: Command,
) -> anyhow::Result<()>
where
    T: MigrationTarget,
    L: LegacySource<Record = T::Legacy>,
    B: BackupSink,
{
    match command {
        Command::Migrate {
            dry_run,
            no_backup,
            tenant,
            ..
        } => {
            let report = runner
                .migrate(MigrateOptions {
                    dry_run,
                    create_backup: !no_backup,
                    tenant_id: tenant,
                })
                .await?;
            info!(
                run_id = %report.run_id,
                attempted = report.tenants_attempted(),
                migrated = report.tenants_migrated(),
                failed = report.failed_count(),
                imported = report.records_imported(),
                skipped = report.records_skipped(),
                "migration finished"
            );
            print_json(&report)
        }
        Command::Verify { tenant, .. } => print_json(&runner.verify_migration(tenant).await?),
        Command::Rollback { backup, .. } => {
            let handle = runner
                .backups
                .open(backup)
                .await?
                .ok_or_else(|| StaffServiceError::BackupFailure {
                    reason: format!("backup {backup} not found"),
                })?;
            print_json(&runner.rollback(&handle).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("encode report")?
    );
    Ok(())
}
