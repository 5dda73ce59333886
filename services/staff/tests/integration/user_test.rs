use marquee_domain::id::TenantId;
use marquee_staff::domain::types::{GlobalKey, ListQuery};
use marquee_staff::domain::user::{UserDraft, UserPatch, is_valid_pin};
use marquee_staff::error::StaffServiceError;

use crate::helpers::user_store;

fn draft(username: &str, email: &str) -> UserDraft {
    UserDraft {
        username: username.to_owned(),
        email: email.to_owned(),
        password: "popcorn-2026".to_owned(),
        full_name: format!("{username} Staff"),
        ..Default::default()
    }
}

// ── create_user ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_reject_username_differing_only_in_case() {
    let tenant = TenantId::new();
    let store = user_store(&[tenant]);
    store.create_user(tenant, draft("alice", "a@x.com")).await.unwrap();

    let result = store.create_user(tenant, draft("ALICE", "b@y.com")).await;
    assert!(
        matches!(result, Err(StaffServiceError::DuplicateUsername { .. })),
        "expected DuplicateUsername, got {result:?}"
    );

    let page = store.list_users(tenant, &ListQuery::default()).await.unwrap();
    assert_eq!(page.summary.total_users, 1);
    // The rejected user's email was never claimed.
    assert!(!store.engine.key_claimed(&GlobalKey::email("b@y.com")).await.unwrap());
}

#[tokio::test]
async fn should_allow_same_username_in_different_tenants() {
    let (a, b) = (TenantId::new(), TenantId::new());
    let store = user_store(&[a, b]);
    let first = store.create_user(a, draft("alice", "a@x.com")).await.unwrap();
    let second = store.create_user(b, draft("alice", "b@y.com")).await.unwrap();
    assert_ne!(first.pin, second.pin);
    assert_eq!(store.engine.repo.document_count(), 2);
}

#[tokio::test]
async fn should_reject_email_claimed_by_another_tenant() {
    let (a, b) = (TenantId::new(), TenantId::new());
    let store = user_store(&[a, b]);
    store.create_user(a, draft("alice", "a@x.com")).await.unwrap();

    let result = store.create_user(b, draft("bob", " A@X.com ")).await;
    assert!(
        matches!(&result, Err(StaffServiceError::DuplicateEmail { email }) if email == "a@x.com"),
        "expected DuplicateEmail, got {result:?}"
    );
}

#[tokio::test]
async fn should_reject_malformed_pin_and_email() {
    let tenant = TenantId::new();
    let store = user_store(&[tenant]);
    let bad_pin = store
        .create_user(
            tenant,
            UserDraft {
                pin: Some("12a4".into()),
                ..draft("alice", "a@x.com")
            },
        )
        .await;
    assert!(matches!(bad_pin, Err(StaffServiceError::InvalidInput(_))));

    let bad_email = store.create_user(tenant, draft("alice", "not-an-email")).await;
    assert!(matches!(bad_email, Err(StaffServiceError::InvalidInput(_))));
    assert_eq!(store.engine.repo.document_count(), 0);
}

#[tokio::test]
async fn should_keep_supplied_pin() {
    let tenant = TenantId::new();
    let store = user_store(&[tenant]);
    let user = store
        .create_user(
            tenant,
            UserDraft {
                pin: Some("0420".into()),
                ..draft("alice", "a@x.com")
            },
        )
        .await
        .unwrap();
    assert_eq!(user.pin, "0420");
}

// ── delete ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_keep_claims_after_soft_delete() {
    let tenant = TenantId::new();
    let store = user_store(&[tenant]);
    let user = store
        .create_user(
            tenant,
            UserDraft {
                pin: Some("1234".into()),
                ..draft("alice", "a@x.com")
            },
        )
        .await
        .unwrap();

    let deleted = store.soft_delete_user(user.meta.id).await.unwrap();
    assert!(!deleted.meta.is_active);

    let other = TenantId::new();
    store.engine.tenants.known.lock().unwrap().insert(other);
    let result = store
        .create_user(
            other,
            UserDraft {
                pin: Some("1234".into()),
                ..draft("bob", "b@y.com")
            },
        )
        .await;
    assert!(matches!(result, Err(StaffServiceError::DuplicatePin)));

    // The username is free again inside the tenant.
    let again = store
        .create_user(tenant, draft("alice", "alice2@x.com"))
        .await
        .unwrap();
    assert!(again.meta.is_active);
}

#[tokio::test]
async fn should_free_pin_and_email_after_hard_delete() {
    let tenant = TenantId::new();
    let store = user_store(&[tenant]);
    let user = store
        .create_user(
            tenant,
            UserDraft {
                pin: Some("1234".into()),
                ..draft("alice", "a@x.com")
            },
        )
        .await
        .unwrap();

    store.hard_delete_user(user.meta.id).await.unwrap();
    assert!(matches!(
        store.find_user(user.meta.id).await,
        Err(StaffServiceError::UserNotFound(_))
    ));

    let reused = store
        .create_user(
            tenant,
            UserDraft {
                pin: Some("1234".into()),
                ..draft("bob", "a@x.com")
            },
        )
        .await
        .unwrap();
    assert_eq!(reused.pin, "1234");
    assert_eq!(reused.email, "a@x.com");
}

// ── update_user ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_move_email_claim_on_update() {
    let tenant = TenantId::new();
    let store = user_store(&[tenant]);
    let user = store.create_user(tenant, draft("alice", "a@x.com")).await.unwrap();
    store
        .update_user(
            user.meta.id,
            UserPatch {
                is_email_verified: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let updated = store
        .update_user(
            user.meta.id,
            UserPatch {
                email: Some("alice@cinema.example".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.email, "alice@cinema.example");
    assert!(!updated.is_email_verified);
    assert!(!store.engine.key_claimed(&GlobalKey::email("a@x.com")).await.unwrap());
    assert!(
        store
            .engine
            .key_claimed(&GlobalKey::email("alice@cinema.example"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn should_reject_rename_onto_active_username() {
    let tenant = TenantId::new();
    let store = user_store(&[tenant]);
    store.create_user(tenant, draft("alice", "a@x.com")).await.unwrap();
    let bob = store.create_user(tenant, draft("bob", "b@x.com")).await.unwrap();

    let result = store
        .update_user(
            bob.meta.id,
            UserPatch {
                username: Some("Alice".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(StaffServiceError::DuplicateUsername { .. })));
    assert_eq!(store.find_user(bob.meta.id).await.unwrap(), bob);
}

// ── list_users ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_search_users_and_report_summary() {
    let tenant = TenantId::new();
    let store = user_store(&[tenant]);
    for (username, email) in [("carol", "c@x.com"), ("alice", "a@x.com"), ("bob", "b@x.com")] {
        let user = store.create_user(tenant, draft(username, email)).await.unwrap();
        assert!(is_valid_pin(&user.pin));
    }

    let page = store.list_users(tenant, &ListQuery::default()).await.unwrap();
    let names: Vec<_> = page.records.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob", "carol"]);
    assert_eq!(page.summary.total_users, 3);
    assert_eq!(page.summary.verified_users, 0);

    let found = store
        .list_users(
            tenant,
            &ListQuery {
                search: Some("CAR".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(found.records.len(), 1);
    assert_eq!(found.records[0].username, "carol");
}
