use std::collections::BTreeMap;

use anyhow::Context as _;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, FromQueryResult, QueryFilter, QueryOrder, Statement, TransactionError,
    TransactionTrait,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use marquee_domain::id::TenantId;
use marquee_staff_schema::{legacy_roles, legacy_users, migration_backups, tenants};

use crate::domain::legacy::{LegacyRole, LegacyUser};
use crate::domain::repository::{BackupHandle, BackupSink, LegacySource, TenantDirectory};
use crate::domain::types::StoreKind;
use crate::error::StaffServiceError;

const RESTORE_BATCH: usize = 500;

// ── Tenant directory ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbTenantDirectory {
    pub db: DatabaseConnection,
}

impl TenantDirectory for DbTenantDirectory {
    async fn ping(&self) -> Result<(), StaffServiceError> {
        tenants::Entity::find()
            .one(&self.db)
            .await
            .context("reach tenant directory")?;
        Ok(())
    }

    async fn exists(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError> {
        let tenant = tenants::Entity::find_by_id(tenant_id.0)
            .one(&self.db)
            .await
            .context("find tenant")?;
        Ok(tenant.is_some())
    }
}

// ── Legacy collections ───────────────────────────────────────────────────────

#[derive(Debug, FromQueryResult)]
struct CountRow {
    tenant_id: Uuid,
    record_count: i64,
}

async fn count_by_tenant(
    db: &DatabaseConnection,
    table: &str,
    scope: Option<TenantId>,
) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
    let (filter, values): (&str, Vec<sea_orm::Value>) = match scope {
        Some(tenant_id) => ("WHERE tenant_id = $1", vec![tenant_id.0.into()]),
        None => ("", Vec::new()),
    };
    let sql = format!(
        "SELECT tenant_id, COUNT(*)::bigint AS record_count FROM {table} {filter} GROUP BY tenant_id"
    );
    let rows = CountRow::find_by_statement(Statement::from_sql_and_values(
        db.get_database_backend(),
        &sql,
        values,
    ))
    .all(db)
    .await
    .with_context(|| format!("count {table} by tenant"))?;
    Ok(rows
        .into_iter()
        .map(|r| (TenantId(r.tenant_id), r.record_count.max(0) as u64))
        .collect())
}

fn restore_error(e: TransactionError<sea_orm::DbErr>) -> StaffServiceError {
    StaffServiceError::Internal(anyhow::Error::new(e).context("restore legacy rows"))
}

#[derive(Clone)]
pub struct DbLegacyRoleSource {
    pub db: DatabaseConnection,
}

impl LegacySource for DbLegacyRoleSource {
    type Record = LegacyRole;

    async fn ping(&self) -> Result<(), StaffServiceError> {
        self.db.ping().await.context("ping database")?;
        Ok(())
    }

    async fn count_by_tenant(
        &self,
        scope: Option<TenantId>,
    ) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
        count_by_tenant(&self.db, "legacy_roles", scope).await
    }

    async fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<LegacyRole>, StaffServiceError> {
        self.load_all(Some(tenant_id)).await
    }

    async fn load_all(
        &self,
        scope: Option<TenantId>,
    ) -> Result<Vec<LegacyRole>, StaffServiceError> {
        let mut query = legacy_roles::Entity::find();
        if let Some(tenant_id) = scope {
            query = query.filter(legacy_roles::Column::TenantId.eq(tenant_id.0));
        }
        let models = query
            .order_by_asc(legacy_roles::Column::CreatedAt)
            .order_by_asc(legacy_roles::Column::Id)
            .all(&self.db)
            .await
            .context("load legacy roles")?;
        Ok(models.into_iter().map(role_from_model).collect())
    }

    async fn restore(
        &self,
        scope: Option<TenantId>,
        records: &[LegacyRole],
    ) -> Result<(), StaffServiceError> {
        let models: Vec<legacy_roles::ActiveModel> = records.iter().map(role_to_model).collect();
        self.db
            .transaction::<_, (), sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    let mut delete = legacy_roles::Entity::delete_many();
                    if let Some(tenant_id) = scope {
                        delete = delete.filter(legacy_roles::Column::TenantId.eq(tenant_id.0));
                    }
                    delete.exec(txn).await?;
                    for batch in models.chunks(RESTORE_BATCH) {
                        legacy_roles::Entity::insert_many(batch.to_vec())
                            .exec_without_returning(txn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(restore_error)
    }
}

fn role_from_model(model: legacy_roles::Model) -> LegacyRole {
    LegacyRole {
        id: model.id,
        tenant_id: model.tenant_id,
        name: model.name,
        description: model.description,
        permissions: model.permissions,
        priority: model.priority,
        is_global: model.is_global,
        is_default: model.is_default,
        is_active: model.is_active,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

fn role_to_model(role: &LegacyRole) -> legacy_roles::ActiveModel {
    legacy_roles::ActiveModel {
        id: Set(role.id),
        tenant_id: Set(role.tenant_id),
        name: Set(role.name.clone()),
        description: Set(role.description.clone()),
        permissions: Set(role.permissions.clone()),
        priority: Set(role.priority),
        is_global: Set(role.is_global),
        is_default: Set(role.is_default),
        is_active: Set(role.is_active),
        created_at: Set(role.created_at),
        updated_at: Set(role.updated_at),
    }
}

#[derive(Clone)]
pub struct DbLegacyUserSource {
    pub db: DatabaseConnection,
}

impl LegacySource for DbLegacyUserSource {
    type Record = LegacyUser;

    async fn ping(&self) -> Result<(), StaffServiceError> {
        self.db.ping().await.context("ping database")?;
        Ok(())
    }

    async fn count_by_tenant(
        &self,
        scope: Option<TenantId>,
    ) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
        count_by_tenant(&self.db, "legacy_users", scope).await
    }

    async fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<LegacyUser>, StaffServiceError> {
        self.load_all(Some(tenant_id)).await
    }

    async fn load_all(
        &self,
        scope: Option<TenantId>,
    ) -> Result<Vec<LegacyUser>, StaffServiceError> {
        let mut query = legacy_users::Entity::find();
        if let Some(tenant_id) = scope {
            query = query.filter(legacy_users::Column::TenantId.eq(tenant_id.0));
        }
        let models = query
            .order_by_asc(legacy_users::Column::CreatedAt)
            .order_by_asc(legacy_users::Column::Id)
            .all(&self.db)
            .await
            .context("load legacy users")?;
        Ok(models.into_iter().map(user_from_model).collect())
    }

    async fn restore(
        &self,
        scope: Option<TenantId>,
        records: &[LegacyUser],
    ) -> Result<(), StaffServiceError> {
        let models: Vec<legacy_users::ActiveModel> = records.iter().map(user_to_model).collect();
        self.db
            .transaction::<_, (), sea_orm::DbErr>(|txn| {
                Box::pin(async move {
                    let mut delete = legacy_users::Entity::delete_many();
                    if let Some(tenant_id) = scope {
                        delete = delete.filter(legacy_users::Column::TenantId.eq(tenant_id.0));
                    }
                    delete.exec(txn).await?;
                    for batch in models.chunks(RESTORE_BATCH) {
                        legacy_users::Entity::insert_many(batch.to_vec())
                            .exec_without_returning(txn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(restore_error)
    }
}

fn user_from_model(model: legacy_users::Model) -> LegacyUser {
    LegacyUser {
        id: model.id,
        tenant_id: model.tenant_id,
        username: model.username,
        email: model.email,
        password_hash: model.password_hash,
        full_name: model.full_name,
        phone_number: model.phone_number,
        pin: model.pin,
        role_id: model.role_id,
        is_active: model.is_active,
        is_email_verified: model.is_email_verified,
        last_login_at: model.last_login_at,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

fn user_to_model(user: &LegacyUser) -> legacy_users::ActiveModel {
    legacy_users::ActiveModel {
        id: Set(user.id),
        tenant_id: Set(user.tenant_id),
        username: Set(user.username.clone()),
        email: Set(user.email.clone()),
        password_hash: Set(user.password_hash.clone()),
        full_name: Set(user.full_name.clone()),
        phone_number: Set(user.phone_number.clone()),
        pin: Set(user.pin.clone()),
        role_id: Set(user.role_id),
        is_active: Set(user.is_active),
        is_email_verified: Set(user.is_email_verified),
        last_login_at: Set(user.last_login_at),
        created_at: Set(user.created_at),
        updated_at: Set(user.updated_at),
    }
}

// ── Backups ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbBackupSink {
    pub db: DatabaseConnection,
}

fn handle_from_model(model: &migration_backups::Model) -> Result<BackupHandle, StaffServiceError> {
    let store_kind = StoreKind::parse(&model.store_kind).ok_or_else(|| {
        anyhow::anyhow!("backup {} has unknown store kind {:?}", model.id, model.store_kind)
    })?;
    Ok(BackupHandle {
        id: model.id,
        store_kind,
        tenant_id: model.tenant_id.map(TenantId),
        record_count: model.record_count.max(0) as u64,
        created_at: model.created_at,
    })
}

impl BackupSink for DbBackupSink {
    async fn write<L: Serialize + Sync>(
        &self,
        id: Uuid,
        store_kind: StoreKind,
        tenant_id: Option<TenantId>,
        records: &[L],
    ) -> Result<BackupHandle, StaffServiceError> {
        let payload = serde_json::to_value(records).context("encode backup payload")?;
        let model = migration_backups::ActiveModel {
            id: Set(id),
            store_kind: Set(store_kind.as_str().to_owned()),
            tenant_id: Set(tenant_id.map(|t| t.0)),
            record_count: Set(records.len() as i64),
            payload: Set(payload),
            created_at: Set(Utc::now()),
        }
        .insert(&self.db)
        .await
        .context("insert migration backup")?;
        handle_from_model(&model)
    }

    async fn read<L: DeserializeOwned>(
        &self,
        handle: &BackupHandle,
    ) -> Result<Vec<L>, StaffServiceError> {
        let model = migration_backups::Entity::find_by_id(handle.id)
            .one(&self.db)
            .await
            .context("find migration backup")?
            .ok_or_else(|| StaffServiceError::BackupFailure {
                reason: format!("backup {} not found", handle.id),
            })?;
        let records: Vec<L> =
            serde_json::from_value(model.payload).context("decode backup payload")?;
        Ok(records)
    }

    async fn open(&self, id: Uuid) -> Result<Option<BackupHandle>, StaffServiceError> {
        let model = migration_backups::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("find migration backup")?;
        model.as_ref().map(handle_from_model).transpose()
    }
}
