use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AggregateGlobalKeys::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(AggregateGlobalKeys::Kind).string().not_null())
                    .col(ColumnDef::new(AggregateGlobalKeys::Value).string().not_null())
                    .col(
                        ColumnDef::new(AggregateGlobalKeys::StoreKind)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AggregateGlobalKeys::TenantId).uuid().not_null())
                    .col(ColumnDef::new(AggregateGlobalKeys::RecordId).uuid().not_null())
                    .col(
                        ColumnDef::new(AggregateGlobalKeys::ClaimedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(AggregateGlobalKeys::Kind)
                            .col(AggregateGlobalKeys::Value),
                    )
                    .to_owned(),
            )
            .await?;

        // Tenant teardown and rollback release every key of one tenant.
        manager
            .create_index(
                Index::create()
                    .table(AggregateGlobalKeys::Table)
                    .col(AggregateGlobalKeys::StoreKind)
                    .col(AggregateGlobalKeys::TenantId)
                    .name("idx_aggregate_global_keys_store_tenant")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AggregateGlobalKeys::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum AggregateGlobalKeys {
    Table,
    Kind,
    Value,
    StoreKind,
    TenantId,
    RecordId,
    ClaimedAt,
}
