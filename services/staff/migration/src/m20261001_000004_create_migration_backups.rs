use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MigrationBackups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MigrationBackups::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MigrationBackups::StoreKind).string().not_null())
                    .col(ColumnDef::new(MigrationBackups::TenantId).uuid())
                    .col(
                        ColumnDef::new(MigrationBackups::RecordCount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MigrationBackups::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MigrationBackups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MigrationBackups::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum MigrationBackups {
    Table,
    Id,
    StoreKind,
    TenantId,
    RecordCount,
    Payload,
    CreatedAt,
}
