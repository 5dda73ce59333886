use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;

use marquee_domain::id::TenantId;
use marquee_staff::domain::types::RecordSeed;
use marquee_staff::domain::user::{NewUser, PIN_SPACE, User, UserDraft};
use marquee_staff::error::StaffServiceError;

use crate::helpers::{CyclingPin, TestUserStore, user_store};

fn tenants(n: usize) -> Vec<TenantId> {
    (0..n).map(|_| TenantId::new()).collect()
}

fn cycling_store(tenants: &[TenantId], space: u32) -> Arc<TestUserStore<CyclingPin>> {
    let mut store = user_store(tenants).with_pin_source(CyclingPin::new(space));
    store.pins.max_attempts = space * 4;
    store.engine.conflict_retries = 1_000;
    Arc::new(store)
}

fn staff_draft(label: &str) -> UserDraft {
    UserDraft {
        username: label.to_owned(),
        email: format!("{label}@cinema.example"),
        password: "popcorn".into(),
        ..Default::default()
    }
}

/// Issue a PIN and append a user holding it, skipping password hashing.
fn spawn_insert(
    store: Arc<TestUserStore<CyclingPin>>,
    tenant: TenantId,
    i: usize,
) -> JoinHandle<Result<User, StaffServiceError>> {
    tokio::spawn(async move {
        let pin = store.issue_unique_pin().await?;
        let new_user = NewUser {
            username: format!("staff{i}"),
            email: format!("staff{i}@cinema.example"),
            password_hash: "$2b$04$prehashed".into(),
            full_name: String::new(),
            phone_number: None,
            pin,
            role_id: None,
            is_email_verified: false,
            last_login_at: None,
        };
        store
            .engine
            .append_record(tenant, RecordSeed::fresh(), |meta| {
                User::build(new_user.clone(), meta)
            })
            .await
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_never_issue_duplicate_pins_in_small_space_under_concurrency() {
    const SPACE: u32 = 10;
    let tenants = tenants(4);
    let store = cycling_store(&tenants, SPACE);

    let handles = (0..15).map(|i| {
        let store = Arc::clone(&store);
        let tenant = tenants[i % tenants.len()];
        tokio::spawn(async move {
            store
                .create_user(tenant, staff_draft(&format!("staff{i}")))
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let mut pins = HashSet::new();
    for result in &results {
        match result {
            Ok(user) => assert!(pins.insert(user.pin.clone()), "pin {} issued twice", user.pin),
            Err(StaffServiceError::PinSpaceExhausted { .. } | StaffServiceError::DuplicatePin) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert!(pins.len() <= SPACE as usize);
    assert!(results.iter().any(Result::is_err));

    // Fill whatever is left one at a time; the space then reports exhaustion.
    for n in 0.. {
        match store.create_user(tenants[0], staff_draft(&format!("late{n}"))).await {
            Ok(user) => assert!(pins.insert(user.pin.clone())),
            Err(StaffServiceError::PinSpaceExhausted { attempts }) => {
                assert_eq!(attempts, SPACE * 4);
                break;
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(pins.len(), SPACE as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_exhaust_full_pin_space_without_duplicates() {
    let tenants = tenants(50);
    let store = cycling_store(&tenants, PIN_SPACE);

    let mut pins = HashSet::new();
    let indices: Vec<usize> = (0..PIN_SPACE as usize + 200).collect();
    for chunk in indices.chunks(500) {
        let handles = chunk
            .iter()
            .map(|&i| spawn_insert(Arc::clone(&store), tenants[i % tenants.len()], i));
        for joined in join_all(handles).await {
            match joined.unwrap() {
                Ok(user) => assert!(pins.insert(user.pin.clone()), "pin {} issued twice", user.pin),
                Err(StaffServiceError::PinSpaceExhausted { .. } | StaffServiceError::DuplicatePin) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
    }
    assert!(pins.len() <= PIN_SPACE as usize);

    // Any PIN lost to a same-candidate race is still free; claim the rest.
    let mut i = indices.len();
    while pins.len() < PIN_SPACE as usize {
        i += 1;
        let user = spawn_insert(Arc::clone(&store), tenants[i % tenants.len()], i)
            .await
            .unwrap()
            .unwrap();
        assert!(pins.insert(user.pin.clone()));
    }

    assert_eq!(store.engine.repo.key_count(), pins.len() * 2);
    assert!(matches!(
        store.issue_unique_pin().await,
        Err(StaffServiceError::PinSpaceExhausted { .. })
    ));
}
