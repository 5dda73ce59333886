use sea_orm::entity::prelude::*;

/// Cross-tenant uniqueness index for values that must be unique system-wide
/// (user PINs and emails). A row is a claim on `(kind, value)` by one record.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "aggregate_global_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub kind: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub value: String,
    pub store_kind: String,
    pub tenant_id: Uuid,
    pub record_id: Uuid,
    pub claimed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
