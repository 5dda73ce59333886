use sea_orm_migration::prelude::*;

mod aggregate_table;
mod m20261001_000001_create_role_aggregates;
mod m20261001_000002_create_user_aggregates;
mod m20261001_000003_create_aggregate_global_keys;
mod m20261001_000004_create_migration_backups;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_role_aggregates::Migration),
            Box::new(m20261001_000002_create_user_aggregates::Migration),
            Box::new(m20261001_000003_create_aggregate_global_keys::Migration),
            Box::new(m20261001_000004_create_migration_backups::Migration),
        ]
    }
}
