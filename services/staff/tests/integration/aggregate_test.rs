use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use rand::RngExt;

use marquee_domain::id::{RecordId, TenantId};
use marquee_staff::domain::repository::AggregateRepository;
use marquee_staff::domain::role::{Role, RoleDraft, RolePatch};
use marquee_staff::domain::types::{AggregateRecord, GlobalKey};
use marquee_staff::domain::user::{User, UserDraft, UserPatch};
use marquee_staff::error::StaffServiceError;

use crate::helpers::{TestRoleStore, TestUserStore, role_store, user_store};

fn draft(name: &str) -> RoleDraft {
    RoleDraft {
        name: name.to_owned(),
        priority: 5,
        ..Default::default()
    }
}

async fn assert_summary_consistent(store: &TestRoleStore, tenant: TenantId) {
    let doc = store.engine.load(tenant).await.unwrap();
    let active = doc.records.iter().filter(|r| r.meta.is_active).count() as u64;
    let defaults = doc.records.iter().filter(|r| r.is_default).count() as u64;
    assert_eq!(doc.summary.total_roles, doc.records.len() as u64);
    assert_eq!(doc.summary.active_roles, active);
    assert_eq!(doc.summary.inactive_roles, doc.records.len() as u64 - active);
    assert_eq!(doc.summary.default_roles, defaults);
}

// ── find_or_create ──────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_converge_concurrent_find_or_create_on_one_document() {
    let tenant = TenantId::new();
    let store = Arc::new(role_store(&[tenant]));

    let handles = (0..32).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.engine.find_or_create(tenant).await })
    });
    let ids: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().id)
        .collect();

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(store.engine.repo.document_count(), 1);
}

#[tokio::test]
async fn should_not_create_document_for_unknown_tenant() {
    let store = role_store(&[]);
    let result = store.engine.find_or_create(TenantId::new()).await;
    assert!(matches!(result, Err(StaffServiceError::TenantNotFound(_))));
    assert_eq!(store.engine.repo.document_count(), 0);
}

// ── lost updates ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_not_lose_concurrent_appends() {
    let tenant = TenantId::new();
    let mut store = role_store(&[tenant]);
    store.engine.conflict_retries = 100;
    let store = Arc::new(store);

    let handles = (0..40).map(|i| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.create_role(tenant, draft(&format!("Role {i}"))).await })
    });
    let created: Vec<Role> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let doc = store.engine.load(tenant).await.unwrap();
    assert_eq!(doc.records.len(), 40);
    for role in &created {
        assert!(doc.find(role.meta.id).is_some(), "lost role {}", role.name);
    }
    let mut positions: Vec<_> = doc.records.iter().map(|r| r.meta.sort_position).collect();
    positions.sort_unstable();
    positions.dedup();
    assert_eq!(positions.len(), 40);
    assert_summary_consistent(&store, tenant).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_admit_one_of_many_concurrent_duplicate_names() {
    let tenant = TenantId::new();
    let mut store = role_store(&[tenant]);
    store.engine.conflict_retries = 100;
    let store = Arc::new(store);

    let handles = (0..16).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.create_role(tenant, draft("Projectionist")).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, StaffServiceError::DuplicateName { .. }))
    );
    assert_eq!(store.engine.load(tenant).await.unwrap().records.len(), 1);
}

// ── conflict retry ──────────────────────────────────────────────────────────

#[tokio::test]
async fn should_retry_save_after_conflict() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);
    store.engine.repo.force_conflicts(2);

    let role = store.create_role(tenant, draft("Usher")).await.unwrap();
    let doc = store.engine.load(tenant).await.unwrap();
    assert_eq!(doc.records.len(), 1);
    assert_eq!(doc.records[0].meta.id, role.meta.id);
}

#[tokio::test]
async fn should_surface_conflict_once_retries_are_spent() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);
    store.engine.repo.force_conflicts(store.engine.conflict_retries + 1);

    let result = store.create_role(tenant, draft("Usher")).await;
    assert!(
        matches!(result, Err(StaffServiceError::PersistenceConflict { tenant_id }) if tenant_id == tenant),
        "expected PersistenceConflict, got {result:?}"
    );
    assert!(store.engine.load(tenant).await.unwrap().records.is_empty());
}

// ── summary ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_keep_summary_consistent_across_random_operations() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);
    store
        .create_default_roles_for_tenant(tenant, "Demo Theater")
        .await
        .unwrap();
    let names = ["Cashier", "Usher", "Manager", "Projectionist", "Cleaner", "Host"];
    let mut rng = rand::rng();

    for _ in 0..300 {
        let doc = store.engine.load(tenant).await.unwrap();
        let pick = (!doc.records.is_empty())
            .then(|| doc.records[rng.random_range(0..doc.records.len())].clone());
        let result = match (rng.random_range(0..4), pick) {
            (0, _) | (_, None) => {
                let name = names[rng.random_range(0..names.len())];
                store.create_role(tenant, draft(name)).await.map(|_| ())
            }
            (1, Some(role)) => store
                .update_role(
                    role.meta.id,
                    RolePatch {
                        is_active: Some(!role.meta.is_active),
                        ..Default::default()
                    },
                )
                .await
                .map(|_| ()),
            (2, Some(role)) => store.delete_role(role.meta.id).await.map(|_| ()),
            (_, Some(role)) => store
                .update_role(
                    role.meta.id,
                    RolePatch {
                        priority: Some(rng.random_range(1..20)),
                        ..Default::default()
                    },
                )
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    StaffServiceError::DuplicateName { .. }
                        | StaffServiceError::ProtectedRecord { .. }
                ),
                "unexpected error {e:?}"
            );
        }
        assert_summary_consistent(&store, tenant).await;
    }
}

async fn assert_users_consistent(store: &TestUserStore, tenants: &[TenantId]) -> Vec<User> {
    let mut held: BTreeMap<GlobalKey, RecordId> = BTreeMap::new();
    let mut users = Vec::new();
    for &tenant in tenants {
        let Some(doc) = store.engine.repo.find(tenant).await.unwrap() else {
            continue;
        };
        assert_eq!(doc.summary, User::summarize(&doc.records));
        for (key, owner) in doc.global_keys().unwrap() {
            assert!(held.insert(key.clone(), owner).is_none(), "{key:?} held twice");
        }
        users.extend(doc.records);
    }
    assert_eq!(store.engine.repo.claimed_keys(), held);
    users
}

#[tokio::test]
async fn should_keep_user_summary_and_key_claims_consistent_across_random_operations() {
    let tenants = [TenantId::new(), TenantId::new()];
    let store = user_store(&tenants);
    let names = ["alice", "bob", "carol", "dave", "erin"];
    let emails = ["a@x.com", "b@x.com", "c@x.com", "d@x.com", "e@x.com", "f@x.com"];
    let mut rng = rand::rng();
    let mut users: Vec<User> = Vec::new();

    for _ in 0..200 {
        let pick = (!users.is_empty()).then(|| users[rng.random_range(0..users.len())].clone());
        let email = emails[rng.random_range(0..emails.len())];
        let result = match (rng.random_range(0..7), pick) {
            (0, _) | (_, None) => {
                let tenant = tenants[rng.random_range(0..tenants.len())];
                let draft = UserDraft {
                    username: names[rng.random_range(0..names.len())].to_owned(),
                    email: email.to_owned(),
                    password: "popcorn".into(),
                    ..Default::default()
                };
                store.create_user(tenant, draft).await.map(|_| ())
            }
            (1, Some(user)) => {
                let patch = UserPatch {
                    email: Some(email.to_owned()),
                    ..Default::default()
                };
                store.update_user(user.meta.id, patch).await.map(|updated| {
                    if updated.email != user.email {
                        assert!(!updated.is_email_verified);
                    }
                })
            }
            (2, Some(user)) => {
                let patch = UserPatch {
                    is_email_verified: Some(!user.is_email_verified),
                    ..Default::default()
                };
                store.update_user(user.meta.id, patch).await.map(|_| ())
            }
            (3, Some(user)) => store.soft_delete_user(user.meta.id).await.map(|_| ()),
            (4, Some(user)) => store.hard_delete_user(user.meta.id).await.map(|_| ()),
            (5, Some(user)) => store.reissue_pin(user.meta.id).await.map(|_| ()),
            (_, Some(user)) => {
                let patch = UserPatch {
                    is_active: Some(true),
                    ..Default::default()
                };
                store.update_user(user.meta.id, patch).await.map(|_| ())
            }
        };
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    StaffServiceError::DuplicateUsername { .. }
                        | StaffServiceError::DuplicateEmail { .. }
                        | StaffServiceError::DuplicatePin
                ),
                "unexpected error {e:?}"
            );
        }
        users = assert_users_consistent(&store, &tenants).await;
    }
}
