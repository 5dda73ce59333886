use marquee_domain::id::{RecordId, TenantId};
use marquee_domain::pagination::Sort;
use marquee_staff::domain::role::{
    KIOSK_SCREEN, Permission, Role, RoleDraft, RolePatch, THEATER_ADMIN,
};
use marquee_staff::domain::types::{ListQuery, RecordPage};
use marquee_staff::error::StaffServiceError;

use crate::helpers::role_store;

fn draft(name: &str, priority: i32) -> RoleDraft {
    RoleDraft {
        name: name.to_owned(),
        description: format!("{name} role"),
        permissions: vec![Permission::new("orders", "Order History", "/theater/orders", true)],
        priority,
        ..Default::default()
    }
}

fn names(page: RecordPage<Role>) -> Vec<String> {
    page.records.into_iter().map(|r| r.name).collect()
}

// ── create_default_roles_for_tenant ─────────────────────────────────────────

#[tokio::test]
async fn should_bootstrap_two_protected_default_roles() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);

    let roles = store
        .create_default_roles_for_tenant(tenant, "Demo Theater")
        .await
        .unwrap();

    assert_eq!(roles.len(), 2);
    let (admin, kiosk) = (&roles[0], &roles[1]);
    assert_eq!(admin.name, THEATER_ADMIN);
    assert_eq!(admin.priority, 1);
    assert_eq!(admin.permissions.len(), 11);
    assert!(admin.is_default && !admin.can_delete && !admin.can_edit);
    assert_eq!(kiosk.name, KIOSK_SCREEN);
    assert_eq!(kiosk.priority, 10);
    assert_eq!(kiosk.permissions.len(), 5);
    assert!(kiosk.is_default && !kiosk.can_delete);

    let again = store
        .create_default_roles_for_tenant(tenant, "Demo Theater")
        .await
        .unwrap();
    assert_eq!(again, roles);

    let page = store.list_roles(tenant, &ListQuery::default()).await.unwrap();
    assert_eq!(page.summary.total_roles, 2);
    assert_eq!(page.summary.default_roles, 2);
}

#[tokio::test]
async fn should_reject_bootstrap_for_unknown_tenant() {
    let store = role_store(&[]);
    let result = store
        .create_default_roles_for_tenant(TenantId::new(), "Ghost Theater")
        .await;
    assert!(
        matches!(result, Err(StaffServiceError::TenantNotFound(_))),
        "expected TenantNotFound, got {result:?}"
    );
}

// ── update_role ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_allow_permission_only_patch_on_default_role() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);
    let roles = store
        .create_default_roles_for_tenant(tenant, "Demo Theater")
        .await
        .unwrap();
    let admin = &roles[0];

    let permissions = vec![Permission::new("dashboard", "Dashboard", "/theater/dashboard", false)];
    let updated = store
        .update_role(
            admin.meta.id,
            RolePatch {
                permissions: Some(permissions.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.permissions, permissions);
    assert_eq!(updated.name, THEATER_ADMIN);
    assert!(updated.is_default);
}

#[tokio::test]
async fn should_block_rename_of_default_role_alone_or_with_permissions() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);
    let roles = store
        .create_default_roles_for_tenant(tenant, "Demo Theater")
        .await
        .unwrap();
    let admin = roles[0].clone();

    let patches = [
        RolePatch {
            name: Some("x".into()),
            ..Default::default()
        },
        RolePatch {
            name: Some("x".into()),
            permissions: Some(vec![]),
            ..Default::default()
        },
    ];
    for patch in patches {
        let result = store.update_role(admin.meta.id, patch).await;
        match result {
            Err(StaffServiceError::ProtectedRecord {
                record_id,
                blocked_fields,
                allowed_fields,
            }) => {
                assert_eq!(record_id, admin.meta.id);
                assert_eq!(blocked_fields, vec!["name"]);
                assert_eq!(allowed_fields, vec!["permissions", "is_active"]);
            }
            other => panic!("expected ProtectedRecord, got {other:?}"),
        }
        assert_eq!(store.find_role(admin.meta.id).await.unwrap(), admin);
    }
}

#[tokio::test]
async fn should_fail_update_of_unknown_role() {
    let store = role_store(&[]);
    let id = RecordId::new();
    let result = store
        .update_role(
            id,
            RolePatch {
                priority: Some(3),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(StaffServiceError::RoleNotFound(missing)) if missing == id));
}

// ── create_role ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_reject_duplicate_name_and_leave_store_unchanged() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);
    store.create_role(tenant, draft("Cashier", 5)).await.unwrap();
    let before = store.engine.load(tenant).await.unwrap();

    let result = store.create_role(tenant, draft("  CASHIER ", 7)).await;
    assert!(
        matches!(result, Err(StaffServiceError::DuplicateName { .. })),
        "expected DuplicateName, got {result:?}"
    );

    let after = store.engine.load(tenant).await.unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.records, before.records);
    assert_eq!(after.summary, before.summary);
}

#[tokio::test]
async fn should_scope_role_names_to_tenant() {
    let (a, b) = (TenantId::new(), TenantId::new());
    let store = role_store(&[a, b]);
    store.create_role(a, draft("Cashier", 5)).await.unwrap();
    store.create_role(b, draft("Cashier", 5)).await.unwrap();
    assert_eq!(store.engine.repo.document_count(), 2);
}

// ── list_roles ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_list_by_priority_and_reverse_on_desc() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);
    for (name, priority) in [("Usher", 8), ("Manager", 2), ("Cashier", 5)] {
        store.create_role(tenant, draft(name, priority)).await.unwrap();
    }

    let asc = store.list_roles(tenant, &ListQuery::default()).await.unwrap();
    assert_eq!(names(asc), vec!["Manager", "Cashier", "Usher"]);

    let desc = store
        .list_roles(
            tenant,
            &ListQuery {
                order: Some(Sort::Desc),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(names(desc), vec!["Usher", "Cashier", "Manager"]);
}

#[tokio::test]
async fn should_filter_list_by_active_flag() {
    let tenant = TenantId::new();
    let store = role_store(&[tenant]);
    let usher = store.create_role(tenant, draft("Usher", 8)).await.unwrap();
    store.create_role(tenant, draft("Cashier", 5)).await.unwrap();
    store
        .update_role(
            usher.meta.id,
            RolePatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let inactive = store
        .list_roles(
            tenant,
            &ListQuery {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(inactive.records.len(), 1);
    assert_eq!(inactive.records[0].meta.id, usher.meta.id);
    assert_eq!(inactive.summary.active_roles, 1);
    assert_eq!(inactive.summary.inactive_roles, 1);
}
