//! Shared tests for ApiKeyRepo implementations

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{
    backend_tests,
    harness::{create_account, cycle_start},
};
use crate::{
    db::{DbError, DbPool},
    models::{CreateApiKey, PlanTier},
};

fn created_at() -> DateTime<Utc> {
    cycle_start() + Duration::hours(3)
}

fn key_input(account_id: Uuid, name: &str) -> CreateApiKey {
    CreateApiKey {
        account_id,
        name: name.to_string(),
        expires_at: None,
    }
}

async fn test_create_and_get_by_hash(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    let key = db
        .api_keys()
        .create(key_input(account.id, "ci"), "hash-1", "tg_live_abcd", created_at())
        .await
        .unwrap();
    assert!(key.active);
    assert_eq!(key.usage_count, 0);
    assert!(key.last_used_at.is_none());
    assert_eq!(key.created_at, created_at());

    let resolved = db
        .api_keys()
        .get_by_hash("hash-1")
        .await
        .unwrap()
        .expect("key resolves");
    assert_eq!(resolved.key.id, key.id);
    assert_eq!(resolved.key.key_prefix, "tg_live_abcd");
    assert_eq!(resolved.account.id, account.id);
    assert_eq!(resolved.account.tier, PlanTier::Basic);
    assert_eq!(resolved.key.created_at, created_at());
}

async fn test_get_by_hash_unknown(db: &DbPool) {
    assert!(db.api_keys().get_by_hash("nope").await.unwrap().is_none());
}

async fn test_duplicate_hash_conflicts(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    db.api_keys()
        .create(key_input(account.id, "a"), "same", "tg_a", created_at())
        .await
        .unwrap();
    let err = db
        .api_keys()
        .create(key_input(account.id, "b"), "same", "tg_b", created_at())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));
}

async fn test_create_for_missing_account_fails(db: &DbPool) {
    let err = db
        .api_keys()
        .create(key_input(Uuid::new_v4(), "orphan"), "h", "tg_x", created_at())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Validation(_)));
}

async fn test_record_use(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    let key = db
        .api_keys()
        .create(key_input(account.id, "ci"), "hash-1", "tg_live_abcd", created_at())
        .await
        .unwrap();

    let at = Utc::now();
    db.api_keys().record_use(key.id, at).await.unwrap();
    db.api_keys().record_use(key.id, at).await.unwrap();

    let fetched = db.api_keys().get_by_id(key.id).await.unwrap().unwrap();
    assert_eq!(fetched.usage_count, 2);
    assert_eq!(fetched.last_used_at, Some(at));
}

async fn test_deactivated_key_still_resolves(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    let key = db
        .api_keys()
        .create(key_input(account.id, "ci"), "hash-1", "tg_live_abcd", created_at())
        .await
        .unwrap();
    db.api_keys().deactivate(key.id).await.unwrap();

    let resolved = db.api_keys().get_by_hash("hash-1").await.unwrap().unwrap();
    assert!(!resolved.key.active);
}

async fn test_expiry_round_trips(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    let expires = Utc::now() + Duration::days(7);
    let mut input = key_input(account.id, "temp");
    input.expires_at = Some(expires);
    let key = db.api_keys().create(input, "hash-1", "tg_x", created_at()).await.unwrap();

    let fetched = db.api_keys().get_by_id(key.id).await.unwrap().unwrap();
    assert_eq!(fetched.expires_at, Some(expires));
}

async fn test_list_by_account(db: &DbPool) {
    let acme = create_account(db, "acme", PlanTier::Basic).await;
    let other = create_account(db, "other", PlanTier::Basic).await;
    db.api_keys()
        .create(key_input(acme.id, "a"), "h1", "tg_1", created_at())
        .await
        .unwrap();
    db.api_keys()
        .create(key_input(acme.id, "b"), "h2", "tg_2", created_at())
        .await
        .unwrap();
    db.api_keys()
        .create(key_input(other.id, "c"), "h3", "tg_3", created_at())
        .await
        .unwrap();

    let keys = db.api_keys().list_by_account(acme.id).await.unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.account_id == acme.id));
}

async fn test_record_use_missing_key(db: &DbPool) {
    let err = db
        .api_keys()
        .record_use(Uuid::new_v4(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

backend_tests!(
    test_create_and_get_by_hash,
    test_get_by_hash_unknown,
    test_duplicate_hash_conflicts,
    test_create_for_missing_account_fails,
    test_record_use,
    test_deactivated_key_still_resolves,
    test_expiry_round_trips,
    test_list_by_account,
    test_record_use_missing_key,
);
