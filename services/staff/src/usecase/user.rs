use std::collections::BTreeMap;

use anyhow::Context;
use tracing::{debug, info};
use uuid::Uuid;

use marquee_domain::id::{RecordId, TenantId};
use marquee_domain::text::normalize_key;

use crate::config::StoreSettings;
use crate::domain::legacy::LegacyUser;
use crate::domain::repository::{AggregateRepository, Clock, TenantDirectory};
use crate::domain::types::{
    AggregateDocument, DiscardedRun, GlobalKey, ListQuery, RecordPage, RecordSeed,
};
use crate::domain::user::{
    NewUser, User, UserDraft, UserPatch, is_valid_pin, normalize_email, validate_pin,
};
use crate::error::StaffServiceError;
use crate::usecase::aggregate::AggregateStore;
use crate::usecase::migrate::MigrationTarget;
use crate::usecase::pin::{PinIssuer, PinLedger, PinSource, RandomPin};

impl<P, D, C> PinLedger for AggregateStore<User, P, D, C>
where
    P: AggregateRepository<User>,
    D: TenantDirectory,
    C: Clock,
{
    async fn is_claimed(&self, pin: &str) -> Result<bool, StaffServiceError> {
        self.key_claimed(&GlobalKey::pin(pin)).await
    }
}

/// Staff user management over per-tenant user aggregates.
pub struct UserStore<P, D, C, S = RandomPin> {
    pub engine: AggregateStore<User, P, D, C>,
    pub pins: PinIssuer<S>,
    pub bcrypt_cost: u32,
}

impl<P, D, C> UserStore<P, D, C, RandomPin>
where
    P: AggregateRepository<User>,
    D: TenantDirectory,
    C: Clock,
{
    pub fn new(repo: P, tenants: D, clock: C, settings: &StoreSettings) -> Self {
        Self {
            engine: AggregateStore::new(repo, tenants, clock, settings.conflict_retries),
            pins: PinIssuer {
                source: RandomPin,
                max_attempts: settings.pin_max_attempts,
            },
            bcrypt_cost: settings.bcrypt_cost,
        }
    }
}

impl<P, D, C, S> UserStore<P, D, C, S>
where
    P: AggregateRepository<User>,
    D: TenantDirectory,
    C: Clock,
    S: PinSource,
{
    pub fn with_pin_source<T: PinSource>(self, source: T) -> UserStore<P, D, C, T> {
        UserStore {
            engine: self.engine,
            pins: PinIssuer {
                source,
                max_attempts: self.pins.max_attempts,
            },
            bcrypt_cost: self.bcrypt_cost,
        }
    }

    /// A PIN no user in any tenant currently holds. Nothing is reserved.
    pub async fn issue_unique_pin(&self) -> Result<String, StaffServiceError> {
        self.pins.issue(&self.engine).await
    }

    pub async fn create_user(
        &self,
        tenant_id: TenantId,
        draft: UserDraft,
    ) -> Result<User, StaffServiceError> {
        if let Some(pin) = &draft.pin {
            validate_pin(pin)?;
            if self.engine.key_claimed(&GlobalKey::pin(pin)).await? {
                return Err(StaffServiceError::DuplicatePin);
            }
        }
        let email = normalize_email(&draft.email)?;
        if self.engine.key_claimed(&GlobalKey::email(&email)).await? {
            return Err(StaffServiceError::DuplicateEmail { email });
        }
        let password_hash = self.hash_password(&draft.password).await?;

        let mut reissued = false;
        loop {
            let pin = match &draft.pin {
                Some(pin) => pin.clone(),
                None => self.issue_unique_pin().await?,
            };
            let new_user = NewUser {
                username: draft.username.clone(),
                email: email.clone(),
                password_hash: password_hash.clone(),
                full_name: draft.full_name.clone(),
                phone_number: draft.phone_number.clone(),
                pin,
                role_id: draft.role_id,
                is_email_verified: false,
                last_login_at: None,
            };
            let result = self
                .engine
                .append_record(tenant_id, RecordSeed::fresh(), |meta| {
                    User::build(new_user.clone(), meta)
                })
                .await;
            match result {
                Err(StaffServiceError::DuplicatePin) if draft.pin.is_none() && !reissued => {
                    debug!(tenant_id = %tenant_id, "issued pin claimed concurrently, reissuing");
                    reissued = true;
                }
                other => return other,
            }
        }
    }

    /// PINs cannot be patched; see [`UserStore::reissue_pin`].
    pub async fn update_user(
        &self,
        user_id: RecordId,
        patch: UserPatch,
    ) -> Result<User, StaffServiceError> {
        let tenant_id = self.engine.find_owner(user_id).await?;
        let password_hash = match &patch.password {
            Some(password) => Some(self.hash_password(password).await?),
            None => None,
        };
        self.engine
            .mutate_record(tenant_id, user_id, |user, now| {
                user.apply_patch(&patch, password_hash.clone(), now)
            })
            .await
    }

    /// Replace the user's PIN with a freshly issued one.
    pub async fn reissue_pin(&self, user_id: RecordId) -> Result<User, StaffServiceError> {
        let tenant_id = self.engine.find_owner(user_id).await?;
        let mut reissued = false;
        loop {
            let pin = self.issue_unique_pin().await?;
            let result = self
                .engine
                .mutate_record(tenant_id, user_id, |user, _| {
                    user.pin = pin.clone();
                    Ok(())
                })
                .await;
            match result {
                Err(StaffServiceError::DuplicatePin) if !reissued => reissued = true,
                Ok(user) => {
                    info!(tenant_id = %tenant_id, record_id = %user_id, "reissued pin");
                    return Ok(user);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Marks the user inactive. Its PIN and email stay claimed.
    pub async fn soft_delete_user(&self, user_id: RecordId) -> Result<User, StaffServiceError> {
        let tenant_id = self.engine.find_owner(user_id).await?;
        self.engine
            .remove_record(tenant_id, user_id, false, |_| Ok(()))
            .await
    }

    /// Removes the user and frees its PIN and email for reuse.
    pub async fn hard_delete_user(&self, user_id: RecordId) -> Result<User, StaffServiceError> {
        let tenant_id = self.engine.find_owner(user_id).await?;
        let user = self
            .engine
            .remove_record(tenant_id, user_id, true, |_| Ok(()))
            .await?;
        info!(tenant_id = %tenant_id, record_id = %user_id, "hard deleted user");
        Ok(user)
    }

    pub async fn list_users(
        &self,
        tenant_id: TenantId,
        query: &ListQuery,
    ) -> Result<RecordPage<User>, StaffServiceError> {
        self.engine.list_records(tenant_id, query).await
    }

    pub async fn find_user(&self, user_id: RecordId) -> Result<User, StaffServiceError> {
        let (_, user) = self.engine.find_record(user_id).await?;
        Ok(user)
    }

    pub async fn teardown_tenant(&self, tenant_id: TenantId) -> Result<bool, StaffServiceError> {
        self.engine.delete_document(tenant_id).await
    }

    async fn hash_password(&self, password: &str) -> Result<String, StaffServiceError> {
        if password.is_empty() {
            return Err(StaffServiceError::InvalidInput(
                "password must not be empty".to_owned(),
            ));
        }
        let password = password.to_owned();
        let cost = self.bcrypt_cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .context("password hashing task failed")?
            .context("failed to hash password")?;
        Ok(hash)
    }

    /// The legacy PIN when it is well formed and unclaimed, else a new one.
    async fn migrated_pin(&self, row: &LegacyUser) -> Result<String, StaffServiceError> {
        if let Some(pin) = row.pin.as_deref().filter(|p| is_valid_pin(p)) {
            if !self.engine.key_claimed(&GlobalKey::pin(pin)).await? {
                return Ok(pin.to_owned());
            }
        }
        let pin = self.issue_unique_pin().await?;
        info!(
            tenant_id = %row.tenant_id,
            record_id = %row.id,
            "issued new pin for migrated user"
        );
        Ok(pin)
    }
}

impl<P, D, C, S> MigrationTarget for UserStore<P, D, C, S>
where
    P: AggregateRepository<User>,
    D: TenantDirectory,
    C: Clock,
    S: PinSource,
{
    type Record = User;
    type Legacy = LegacyUser;

    fn record_keys(user: &User) -> Vec<String> {
        let mut keys = vec![
            format!("id:{}", user.meta.id),
            format!("email:{}", user.email),
        ];
        if user.meta.is_active {
            keys.push(format!("username:{}", user.normalized_username));
        }
        keys
    }

    fn legacy_keys(row: &LegacyUser) -> Vec<String> {
        let mut keys = vec![
            format!("id:{}", row.id),
            format!("email:{}", normalize_key(&row.email)),
        ];
        if row.is_active {
            keys.push(format!("username:{}", normalize_key(&row.username)));
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
    ) -> Result<Option<AggregateDocument<User>>, StaffServiceError> {
        self.engine.repo.find(tenant_id).await
    }

    async fn import(
        &self,
        tenant_id: TenantId,
        run_id: Uuid,
        row: &LegacyUser,
    ) -> Result<User, StaffServiceError> {
        let seed = RecordSeed::migrated(
            RecordId(row.id),
            row.created_at,
            row.updated_at,
            row.is_active,
        );
        let mut reissued = false;
        loop {
            let new_user = NewUser {
                username: row.username.clone(),
                email: row.email.clone(),
                password_hash: row.password_hash.clone(),
                full_name: row.full_name.clone(),
                phone_number: row.phone_number.clone(),
                pin: self.migrated_pin(row).await?,
                role_id: row.role_record_id(),
                is_email_verified: row.is_email_verified,
                last_login_at: row.last_login_at,
            };
            let result = self
                .engine
                .append_tagged(tenant_id, Some(run_id), seed, |meta| {
                    User::build(new_user.clone(), meta)
                })
                .await;
            match result {
                Err(StaffServiceError::DuplicatePin) if !reissued => reissued = true,
                other => return other,
            }
        }
    }

    async fn migrated_counts(&self) -> Result<BTreeMap<TenantId, u64>, StaffServiceError> {
        self.engine.record_counts().await
    }

    async fn discard_run(&self, run_id: Uuid) -> Result<DiscardedRun, StaffServiceError> {
        self.engine.discard_migration_run(run_id).await
    }
}
