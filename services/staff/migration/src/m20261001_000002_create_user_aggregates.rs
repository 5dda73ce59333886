use sea_orm_migration::prelude::*;

use crate::aggregate_table;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        aggregate_table::create(manager, "user_aggregates").await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        aggregate_table::drop(manager, "user_aggregates").await
    }
}
