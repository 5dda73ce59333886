//! Shared DDL for the per-tenant aggregate tables. Role and user aggregates
//! have identical physical layouts and differ only in name.

use sea_orm_migration::prelude::*;

#[derive(Iden)]
enum Aggregate {
    Id,
    TenantId,
    Version,
    NextSortPosition,
    Records,
    Summary,
    MigrationRunId,
    CreatedAt,
    UpdatedAt,
}

pub async fn create(manager: &SchemaManager<'_>, table: &str) -> Result<(), DbErr> {
    let name = Alias::new(table);
    manager
        .create_table(
            Table::create()
                .table(name.clone())
                .if_not_exists()
                .col(ColumnDef::new(Aggregate::Id).uuid().not_null().primary_key())
                .col(
                    ColumnDef::new(Aggregate::TenantId)
                        .uuid()
                        .not_null()
                        .unique_key(),
                )
                .col(
                    ColumnDef::new(Aggregate::Version)
                        .big_integer()
                        .not_null()
                        .default(0),
                )
                .col(
                    ColumnDef::new(Aggregate::NextSortPosition)
                        .big_integer()
                        .not_null()
                        .default(0),
                )
                .col(ColumnDef::new(Aggregate::Records).json_binary().not_null())
                .col(ColumnDef::new(Aggregate::Summary).json_binary().not_null())
                .col(ColumnDef::new(Aggregate::MigrationRunId).uuid())
                .col(
                    ColumnDef::new(Aggregate::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .col(
                    ColumnDef::new(Aggregate::UpdatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .to_owned(),
        )
        .await?;

    manager
        .create_index(
            Index::create()
                .table(name)
                .col(Aggregate::MigrationRunId)
                .name(format!("idx_{table}_migration_run_id"))
                .to_owned(),
        )
        .await?;

    // Record lookup by id uses JSONB containment on `records`.
    manager
        .get_connection()
        .execute_unprepared(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_records ON {table} USING GIN (records jsonb_path_ops)"
        ))
        .await?;
    Ok(())
}

pub async fn drop(manager: &SchemaManager<'_>, table: &str) -> Result<(), DbErr> {
    manager
        .drop_table(Table::drop().table(Alias::new(table)).to_owned())
        .await
}
