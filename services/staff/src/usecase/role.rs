use std::collections::BTreeMap;

use tracing::info;
use uuid::Uuid;

use marquee_domain::id::{RecordId, TenantId};
use marquee_domain::text::normalize_key;

use crate::config::StoreSettings;
use crate::domain::legacy::LegacyRole;
use crate::domain::repository::{AggregateRepository, Clock, TenantDirectory};
use crate::domain::role::{Permission, Role, RoleDraft, RolePatch, default_role_drafts};
use crate::domain::types::{AggregateDocument, DiscardedRun, ListQuery, RecordPage, RecordSeed};
use crate::error::StaffServiceError;
use crate::usecase::aggregate::AggregateStore;
use crate::usecase::migrate::MigrationTarget;

/// Role and permission management over per-tenant role aggregates.
pub struct RoleStore<P, D, C> {
    pub engine: AggregateStore<Role, P, D, C>,
}

impl<P, D, C> RoleStore<P, D, C>
where
    P: AggregateRepository<Role>,
    D: TenantDirectory,
    C: Clock,
{
    pub fn new(repo: P, tenants: D, clock: C, settings: &StoreSettings) -> Self {
        Self {
            engine: AggregateStore::new(repo, tenants, clock, settings.conflict_retries),
        }
    }

    /// Fails with `DuplicateName` if an active role of the tenant already
    /// uses the normalized name.
    pub async fn create_role(
        &self,
        tenant_id: TenantId,
        draft: RoleDraft,
    ) -> Result<Role, StaffServiceError> {
        self.engine
            .append_record(tenant_id, RecordSeed::fresh(), |meta| {
                Role::from_draft(draft.clone(), meta)
            })
            .await
    }

    /// Permission-only patches apply to every role; anything else is limited
    /// by the role's protection class.
    pub async fn update_role(
        &self,
        role_id: RecordId,
        patch: RolePatch,
    ) -> Result<Role, StaffServiceError> {
        let tenant_id = self.engine.find_owner(role_id).await?;
        self.engine
            .mutate_record(tenant_id, role_id, |role, now| role.apply_patch(&patch, now))
            .await
    }

    pub async fn delete_role(&self, role_id: RecordId) -> Result<Role, StaffServiceError> {
        let tenant_id = self.engine.find_owner(role_id).await?;
        let role = self
            .engine
            .remove_record(tenant_id, role_id, true, Role::check_deletable)
            .await?;
        info!(tenant_id = %tenant_id, record_id = %role_id, "deleted role");
        Ok(role)
    }

    pub async fn list_roles(
        &self,
        tenant_id: TenantId,
        query: &ListQuery,
    ) -> Result<RecordPage<Role>, StaffServiceError> {
        self.engine.list_records(tenant_id, query).await
    }

    pub async fn find_role(&self, role_id: RecordId) -> Result<Role, StaffServiceError> {
        let (_, role) = self.engine.find_record(role_id).await?;
        Ok(role)
    }

    /// Ensure the tenant has its two protected default roles. Existing
    /// defaults are returned untouched, never duplicated.
    pub async fn create_default_roles_for_tenant(
        &self,
        tenant_id: TenantId,
        tenant_name: &str,
    ) -> Result<Vec<Role>, StaffServiceError> {
        if !self.engine.tenants.exists(tenant_id).await? {
            return Err(StaffServiceError::TenantNotFound(tenant_id));
        }
        let mut roles = Vec::new();
        for draft in default_role_drafts(tenant_name) {
            roles.push(self.ensure_default_role(tenant_id, draft).await?);
        }
        Ok(roles)
    }

    async fn ensure_default_role(
        &self,
        tenant_id: TenantId,
        draft: RoleDraft,
    ) -> Result<Role, StaffServiceError> {
        let key = normalize_key(&draft.name);
        if let Some(role) = self.find_default(tenant_id, &key).await? {
            return Ok(role);
        }
        match self.create_role(tenant_id, draft).await {
            Ok(role) => {
                info!(
                    tenant_id = %tenant_id,
                    record_id = %role.meta.id,
                    name = %role.name,
                    "created default role"
                );
                Ok(role)
            }
            // A concurrent bootstrap may have won the race.
            Err(err @ StaffServiceError::DuplicateName { .. }) => {
                self.find_default(tenant_id, &key).await?.ok_or(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn find_default(
        &self,
        tenant_id: TenantId,
        normalized_name: &str,
    ) -> Result<Option<Role>, StaffServiceError> {
        let Some(doc) = self.engine.repo.find(tenant_id).await? else {
            return Ok(None);
        };
        Ok(doc
            .records
            .into_iter()
            .find(|r| r.is_default && r.normalized_name == normalized_name))
    }

    pub async fn teardown_tenant(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError> {
        self.engine.delete_document(tenant_id).await
    }
}

impl<P, D, C> MigrationTarget for RoleStore<P, D, C>
where
    P: AggregateRepository<Role>,
    D: TenantDirectory,
    C: Clock,
{
    type Record = Role;
    type Legacy = LegacyRole;

    fn record_keys(role: &Role) -> Vec<String> {
        let mut keys = vec![format!("id:{}", role.meta.id)];
        if role.meta.is_active {
            keys.push(format!("name:{}", role.normalized_name));
        }
        keys
    }

    fn legacy_keys(row: &LegacyRole) -> Vec<String> {
        let mut keys = vec![format!("id:{}", row.id)];
        if row.is_active {
            keys.push(format!("name:{}", normalize_key(&row.name)));
        }
        keys
    }

    async fn ping(&self) -> Result<(), StaffServiceError> {
        self.engine.repo.ping().await?;
        self.engine.tenants.ping().await
    }

    async fn document(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<AggregateDocument<Role>>, StaffServiceError> {
        self.engine.repo.find(tenant_id).await
    }

    async fn import(
        &self,
        tenant_id: TenantId,
        run_id: Uuid,
        row: &LegacyRole,
    ) -> Result<Role, StaffServiceError> {
        let permissions: Vec<Permission> = serde_json::from_value(row.permissions.clone())
            .map_err(|e| StaffServiceError::ConversionFailure {
                reason: format!("role {} has malformed permissions: {e}", row.id),
            })?;
        let draft = RoleDraft {
            name: row.name.clone(),
            description: row.description.clone(),
            permissions,
            priority: row.priority,
            is_global: row.is_global,
            is_default: row.is_default,
        };
        let seed = RecordSeed::migrated(
            RecordId(row.id),
            row.created_at,
            row.updated_at,
            row.is_active,
        );
        self.engine
            .append_tagged(tenant_id, Some(run_id), seed, |meta| {
                Role::from_draft(draft.clone(), meta)
            })
            .await
    }

    async fn migrated_counts(&self) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
        self.engine.record_counts().await
    }

    async fn discard_run(&self, run_id: Uuid) -> Result<DiscardedRun, StaffServiceError> {
        self.engine.discard_migration_run(run_id).await
    }
}
