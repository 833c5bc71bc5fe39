use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{BillingAlert, NewBillingAlert},
};

#[async_trait]
pub trait BillingAlertRepo: Send + Sync {
    /// Persist an alert. At most one alert exists per account and cycle start;
    /// a second insert for the same pair returns `DbError::Conflict`.
    async fn create(&self, alert: NewBillingAlert) -> DbResult<BillingAlert>;

    async fn find_in_cycle(
        &self,
        account_id: Uuid,
        cycle_start: DateTime<Utc>,
    ) -> DbResult<Option<BillingAlert>>;

    async fn list_by_account(&self, account_id: Uuid) -> DbResult<Vec<BillingAlert>>;
}
