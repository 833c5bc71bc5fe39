//! Shared tests for BillingAlertRepo implementations

use chrono::Duration;

use super::{
    backend_tests,
    harness::{create_account, cycle_start},
};
use crate::{
    db::{DbError, DbPool},
    models::{NewBillingAlert, PlanTier},
};

fn alert(account_id: uuid::Uuid, cycle_offset_days: i64) -> NewBillingAlert {
    NewBillingAlert {
        account_id,
        accumulated_cost: 1005,
        threshold: 1000,
        cycle_start: cycle_start() + Duration::days(cycle_offset_days),
        created_at: cycle_start() + Duration::days(cycle_offset_days + 1),
    }
}

async fn test_create_and_find(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    let created = db.billing_alerts().create(alert(account.id, 0)).await.unwrap();
    assert_eq!(created.accumulated_cost, 1005);

    let found = db
        .billing_alerts()
        .find_in_cycle(account.id, cycle_start())
        .await
        .unwrap()
        .expect("alert exists");
    assert_eq!(found, created);

    let next = db
        .billing_alerts()
        .find_in_cycle(account.id, cycle_start() + Duration::days(30))
        .await
        .unwrap();
    assert!(next.is_none());
}

async fn test_one_alert_per_cycle(db: &DbPool) {
    let account = create_account(db, "acme", PlanTier::Basic).await;
    db.billing_alerts().create(alert(account.id, 0)).await.unwrap();

    let err = db
        .billing_alerts()
        .create(alert(account.id, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));

    // The next cycle gets its own alert
    db.billing_alerts().create(alert(account.id, 30)).await.unwrap();
    let all = db.billing_alerts().list_by_account(account.id).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].cycle_start, cycle_start() + Duration::days(30));
}

backend_tests!(test_create_and_find, test_one_alert_per_cycle);
