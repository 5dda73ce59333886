use std::collections::BTreeMap;
use std::marker::PhantomData;

use anyhow::{Context as _, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    FromQueryResult, QueryFilter, Statement, TransactionError, TransactionTrait,
};
use uuid::Uuid;

use marquee_domain::id::{RecordId, TenantId};
use marquee_staff_schema::aggregate_global_keys;

use crate::domain::repository::AggregateRepository;
use crate::domain::types::{AggregateDocument, AggregateRecord, GlobalKey, KeyChanges};
use crate::error::StaffServiceError;

/// Postgres-backed aggregate repository. One row per tenant in the store
/// kind's table, with `records` and `summary` held as JSONB.
pub struct DbAggregateRepository<R> {
    pub db: DatabaseConnection,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for DbAggregateRepository<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: AggregateRecord> DbAggregateRepository<R> {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            _record: PhantomData,
        }
    }

    fn table() -> &'static str {
        R::KIND.table()
    }
}

#[derive(Debug, FromQueryResult)]
struct DocumentRow {
    id: Uuid,
    tenant_id: Uuid,
    version: i64,
    next_sort_position: i64,
    records: serde_json::Value,
    summary: serde_json::Value,
    migration_run_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document<R: AggregateRecord>(self) -> Result<AggregateDocument<R>, StaffServiceError> {
        Ok(AggregateDocument {
            id: self.id,
            tenant_id: TenantId(self.tenant_id),
            version: self.version,
            next_sort_position: self.next_sort_position,
            records: serde_json::from_value(self.records).context("decode aggregate records")?,
            summary: serde_json::from_value(self.summary).context("decode aggregate summary")?,
            migration_run_id: self.migration_run_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromQueryResult)]
struct TenantRow {
    tenant_id: Uuid,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    tenant_id: Uuid,
    record_count: i64,
}

fn transaction_error(e: TransactionError<StaffServiceError>) -> StaffServiceError {
    match e {
        TransactionError::Connection(e) => {
            StaffServiceError::Internal(anyhow::Error::new(e).context("aggregate transaction"))
        }
        TransactionError::Transaction(e) => e,
    }
}

async fn release_tenant_keys(
    txn: &DatabaseTransaction,
    store_kind: &str,
    tenant_ids: Vec<Uuid>,
) -> Result<(), StaffServiceError> {
    if tenant_ids.is_empty() {
        return Ok(());
    }
    aggregate_global_keys::Entity::delete_many()
        .filter(aggregate_global_keys::Column::StoreKind.eq(store_kind))
        .filter(aggregate_global_keys::Column::TenantId.is_in(tenant_ids))
        .exec(txn)
        .await
        .context("release tenant keys")?;
    Ok(())
}

impl<R: AggregateRecord> AggregateRepository<R> for DbAggregateRepository<R> {
    async fn ping(&self) -> Result<(), StaffServiceError> {
        self.db.ping().await.context("ping database")?;
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<AggregateDocument<R>>, StaffServiceError> {
        let sql = format!(
            r#"
            SELECT id, tenant_id, version, next_sort_position, records, summary,
                   migration_run_id, created_at, updated_at
              FROM {table}
             WHERE tenant_id = $1
            "#,
            table = Self::table(),
        );
        let row = DocumentRow::find_by_statement(Statement::from_sql_and_values(
            self.db.get_database_backend(),
            &sql,
            [tenant_id.0.into()],
        ))
        .one(&self.db)
        .await
        .context("find aggregate document")?;
        row.map(DocumentRow::into_document::<R>).transpose()
    }

    async fn insert_if_absent(
        &self,
        doc: &AggregateDocument<R>,
    ) -> Result<AggregateDocument<R>, StaffServiceError> {
        let sql = format!(
            r#"
            INSERT INTO {table}
                (id, tenant_id, version, next_sort_position, records, summary,
                 migration_run_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
            table = Self::table(),
        );
        let records = serde_json::to_value(&doc.records).context("encode aggregate records")?;
        let summary = serde_json::to_value(&doc.summary).context("encode aggregate summary")?;
        self.db
            .execute(Statement::from_sql_and_values(
                self.db.get_database_backend(),
                &sql,
                [
                    doc.id.into(),
                    doc.tenant_id.0.into(),
                    doc.version.into(),
                    doc.next_sort_position.into(),
                    records.into(),
                    summary.into(),
                    doc.migration_run_id.into(),
                    doc.created_at.into(),
                    doc.updated_at.into(),
                ],
            ))
            .await
            .context("insert aggregate document")?;
        self.find(doc.tenant_id)
            .await?
            .ok_or_else(|| anyhow!("aggregate document missing after insert").into())
    }

    async fn save(
        &self,
        doc: &AggregateDocument<R>,
        keys: &KeyChanges,
    ) -> Result<i64, StaffServiceError> {
        let table = Self::table();
        let store_kind = R::KIND.as_str();
        let tenant_id = doc.tenant_id;
        let version = doc.version;
        let next_sort_position = doc.next_sort_position;
        let updated_at = doc.updated_at;
        let records = serde_json::to_value(&doc.records).context("encode aggregate records")?;
        let summary = serde_json::to_value(&doc.summary).context("encode aggregate summary")?;
        let keys = keys.clone();

        self.db
            .transaction::<_, i64, StaffServiceError>(|txn| {
                Box::pin(async move {
                    let backend = txn.get_database_backend();
                    let updated = txn
                        .execute(Statement::from_sql_and_values(
                            backend,
                            format!(
                                r#"
                                UPDATE {table}
                                   SET records = $1, summary = $2, next_sort_position = $3,
                                       updated_at = $4, version = version + 1
                                 WHERE tenant_id = $5 AND version = $6
                                "#
                            ),
                            [
                                records.into(),
                                summary.into(),
                                next_sort_position.into(),
                                updated_at.into(),
                                tenant_id.0.into(),
                                version.into(),
                            ],
                        ))
                        .await
                        .context("compare-and-swap aggregate document")?;
                    if updated.rows_affected() == 0 {
                        return Err(StaffServiceError::PersistenceConflict { tenant_id });
                    }

                    for key in &keys.release {
                        aggregate_global_keys::Entity::delete_many()
                            .filter(aggregate_global_keys::Column::Kind.eq(key.kind.as_str()))
                            .filter(aggregate_global_keys::Column::Value.eq(key.value.as_str()))
                            .filter(aggregate_global_keys::Column::StoreKind.eq(store_kind))
                            .filter(aggregate_global_keys::Column::TenantId.eq(tenant_id.0))
                            .exec(txn)
                            .await
                            .context("release global key")?;
                    }

                    // Re-pointing a key inside the same tenant is allowed;
                    // a claim held by another tenant updates nothing.
                    for (key, record_id) in &keys.claim {
                        let claimed = txn
                            .execute(Statement::from_sql_and_values(
                                backend,
                                r#"
                                INSERT INTO aggregate_global_keys
                                    (kind, value, store_kind, tenant_id, record_id, claimed_at)
                                VALUES ($1, $2, $3, $4, $5, $6)
                                ON CONFLICT (kind, value) DO UPDATE
                                    SET record_id = EXCLUDED.record_id,
                                        claimed_at = EXCLUDED.claimed_at
                                    WHERE aggregate_global_keys.tenant_id = EXCLUDED.tenant_id
                                      AND aggregate_global_keys.store_kind = EXCLUDED.store_kind
                                "#,
                                [
                                    key.kind.as_str().into(),
                                    key.value.clone().into(),
                                    store_kind.into(),
                                    tenant_id.0.into(),
                                    record_id.0.into(),
                                    updated_at.into(),
                                ],
                            ))
                            .await
                            .context("claim global key")?;
                        if claimed.rows_affected() == 0 {
                            return Err(key.kind.duplicate_error(&key.value));
                        }
                    }
                    Ok(version + 1)
                })
            })
            .await
            .map_err(transaction_error)
    }

    async fn find_tenant_of(
        &self,
        record_id: RecordId,
    ) -> Result<Option<TenantId>, StaffServiceError> {
        let sql = format!(
            "SELECT tenant_id FROM {table} WHERE records @> $1::jsonb LIMIT 1",
            table = Self::table(),
        );
        let containing = serde_json::json!([{ "id": record_id }]);
        let row = TenantRow::find_by_statement(Statement::from_sql_and_values(
            self.db.get_database_backend(),
            &sql,
            [containing.into()],
        ))
        .one(&self.db)
        .await
        .context("find record owner")?;
        Ok(row.map(|r| TenantId(r.tenant_id)))
    }

    async fn key_owner(&self, key: &GlobalKey) -> Result<Option<RecordId>, StaffServiceError> {
        let claim = aggregate_global_keys::Entity::find_by_id((
            key.kind.as_str().to_owned(),
            key.value.clone(),
        ))
        .one(&self.db)
        .await
        .context("find global key owner")?;
        Ok(claim.map(|c| RecordId(c.record_id)))
    }

    async fn record_counts(&self) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
        let sql = format!(
            "SELECT tenant_id, jsonb_array_length(records)::bigint AS record_count FROM {table}",
            table = Self::table(),
        );
        let rows = CountRow::find_by_statement(Statement::from_string(
            self.db.get_database_backend(),
            sql,
        ))
        .all(&self.db)
        .await
        .context("count aggregate records")?;
        Ok(rows
            .into_iter()
            .map(|r| (TenantId(r.tenant_id), r.record_count.max(0) as u64))
            .collect())
    }

    async fn delete(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError> {
        let table = Self::table();
        let store_kind = R::KIND.as_str();
        self.db
            .transaction::<_, bool, StaffServiceError>(|txn| {
                Box::pin(async move {
                    let deleted = txn
                        .execute(Statement::from_sql_and_values(
                            txn.get_database_backend(),
                            format!("DELETE FROM {table} WHERE tenant_id = $1"),
                            [tenant_id.0.into()],
                        ))
                        .await
                        .context("delete aggregate document")?;
                    release_tenant_keys(txn, store_kind, vec![tenant_id.0]).await?;
                    Ok(deleted.rows_affected() > 0)
                })
            })
            .await
            .map_err(transaction_error)
    }

    async fn delete_by_migration_run(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<TenantId>, StaffServiceError> {
        let table = Self::table();
        let store_kind = R::KIND.as_str();
        self.db
            .transaction::<_, Vec<TenantId>, StaffServiceError>(|txn| {
                Box::pin(async move {
                    let rows = TenantRow::find_by_statement(Statement::from_sql_and_values(
                        txn.get_database_backend(),
                        format!(
                            "DELETE FROM {table} WHERE migration_run_id = $1 RETURNING tenant_id"
                        ),
                        [run_id.into()],
                    ))
                    .all(txn)
                    .await
                    .context("delete migrated aggregate documents")?;
                    let tenant_ids: Vec<Uuid> = rows.into_iter().map(|r| r.tenant_id).collect();
                    release_tenant_keys(txn, store_kind, tenant_ids.clone()).await?;
                    Ok(tenant_ids.into_iter().map(TenantId).collect())
                })
            })
            .await
            .map_err(transaction_error)
    }

    async fn tenants_with_run_records(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<TenantId>, StaffServiceError> {
        let sql = format!(
            "SELECT tenant_id FROM {table} WHERE records @> $1::jsonb ORDER BY tenant_id",
            table = Self::table(),
        );
        let containing = serde_json::json!([{ "migration_run_id": run_id }]);
        let rows = TenantRow::find_by_statement(Statement::from_sql_and_values(
            self.db.get_database_backend(),
            &sql,
            [containing.into()],
        ))
        .all(&self.db)
        .await
        .context("find documents holding migrated records")?;
        Ok(rows.into_iter().map(|r| TenantId(r.tenant_id)).collect())
    }
}
