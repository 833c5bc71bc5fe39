//! Shared tests for AccountRepo implementations

use chrono::Duration;
use uuid::Uuid;

use super::{
    backend_tests,
    harness::{account_input, create_account, cycle_start},
};
use crate::{
    db::{DbError, DbPool},
    models::{Allowance, PlanStatus, PlanTier, UsageCounter},
};

async fn test_create_and_get(db: &DbPool) {
    let created = create_account(db, "acme", PlanTier::Basic).await;
    assert_eq!(created.calls_consumed, 0);
    assert_eq!(created.predictions_consumed, 0);

    let fetched = db
        .accounts()
        .get(created.id)
        .await
        .expect("get")
        .expect("account exists");
    assert_eq!(fetched.name, "acme");
    assert_eq!(fetched.tier, PlanTier::Basic);
    assert_eq!(fetched.status, PlanStatus::Active);
    assert_eq!(fetched.prediction_allowance, Allowance::Limited(50));
    assert_eq!(fetched.cycle_start, cycle_start());
}

async fn test_get_missing_returns_none(db: &DbPool) {
    assert!(db.accounts().get(Uuid::new_v4()).await.unwrap().is_none());
}

async fn test_create_with_fixed_id_conflicts(db: &DbPool) {
    let id = Uuid::new_v4();
    let mut input = account_input("first", PlanTier::Free);
    input.id = Some(id);
    db.accounts().create(input, cycle_start()).await.unwrap();

    let mut again = account_input("second", PlanTier::Free);
    again.id = Some(id);
    let err = db.accounts().create(again, cycle_start()).await.unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));
}

async fn test_unlimited_allowance_persists_as_sentinel(db: &DbPool) {
    let mut input = account_input("big", PlanTier::Enterprise);
    input.call_allowance = Allowance::Unlimited;
    let account = db.accounts().create(input, cycle_start()).await.unwrap();

    let fetched = db.accounts().get(account.id).await.unwrap().unwrap();
    assert_eq!(fetched.call_allowance, Allowance::Unlimited);
}

async fn test_increment_consumed(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    let now = cycle_start() + Duration::days(1);

    let updated = db
        .accounts()
        .increment_consumed(account.id, UsageCounter::Predictions, 3, now)
        .await
        .unwrap();
    assert_eq!(updated.predictions_consumed, 3);
    assert_eq!(updated.calls_consumed, 0);

    let fetched = db.accounts().get(account.id).await.unwrap().unwrap();
    assert_eq!(fetched.predictions_consumed, 3);
    assert_eq!(fetched.updated_at, now);
}

async fn test_increment_clamps_at_allowance(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    let now = cycle_start() + Duration::days(1);

    let updated = db
        .accounts()
        .increment_consumed(account.id, UsageCounter::Predictions, 80, now)
        .await
        .unwrap();
    assert_eq!(updated.predictions_consumed, 50);
    assert_eq!(
        updated
            .allowance(UsageCounter::Predictions)
            .remaining(updated.predictions_consumed),
        Some(0)
    );
}

async fn test_increment_rolls_expired_cycle(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    let in_cycle = cycle_start() + Duration::days(1);
    db.accounts()
        .increment_consumed(account.id, UsageCounter::Calls, 10, in_cycle)
        .await
        .unwrap();
    db.accounts()
        .increment_consumed(account.id, UsageCounter::Predictions, 5, in_cycle)
        .await
        .unwrap();

    let next_cycle = cycle_start() + Duration::days(31);
    let updated = db
        .accounts()
        .increment_consumed(account.id, UsageCounter::Calls, 1, next_cycle)
        .await
        .unwrap();
    assert_eq!(updated.calls_consumed, 1);
    assert_eq!(updated.predictions_consumed, 0);
    assert_eq!(updated.cycle_start, cycle_start() + Duration::days(30));
    assert_eq!(updated.cycle_end, cycle_start() + Duration::days(60));
}

async fn test_increment_missing_account(db: &DbPool) {
    let err = db
        .accounts()
        .increment_consumed(Uuid::new_v4(), UsageCounter::Calls, 1, cycle_start())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound));
}

async fn test_update_plan(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Free).await;
    let updated = db
        .accounts()
        .update_plan(
            account.id,
            PlanTier::Professional,
            PlanStatus::PastDue,
            cycle_start() + Duration::hours(1),
        )
        .await
        .unwrap();
    assert_eq!(updated.tier, PlanTier::Professional);
    assert_eq!(updated.status, PlanStatus::PastDue);
}

async fn test_list_accounts(db: &DbPool) {
    create_account(db, "one", PlanTier::Free).await;
    create_account(db, "two", PlanTier::Basic).await;
    let accounts = db.accounts().list().await.unwrap();
    assert_eq!(accounts.len(), 2);
}

backend_tests!(
    test_create_and_get,
    test_get_missing_returns_none,
    test_create_with_fixed_id_conflicts,
    test_unlimited_allowance_persists_as_sentinel,
    test_increment_consumed,
    test_increment_clamps_at_allowance,
    test_increment_rolls_expired_cycle,
    test_increment_missing_account,
    test_update_plan,
    test_list_accounts,
);
