use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::BillingAlertRepo,
    },
    models::{BillingAlert, NewBillingAlert},
};

pub struct SqliteBillingAlertRepo {
    pool: SqlitePool,
}

impl SqliteBillingAlertRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_alert(row: &SqliteRow) -> DbResult<BillingAlert> {
        Ok(BillingAlert {
            id: parse_uuid(row.get("id"))?,
            account_id: parse_uuid(row.get("account_id"))?,
            accumulated_cost: row.get("accumulated_cost"),
            threshold: row.get("threshold"),
            cycle_start: row.get("cycle_start"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl BillingAlertRepo for SqliteBillingAlertRepo {
    async fn create(&self, alert: NewBillingAlert) -> DbResult<BillingAlert> {
        let alert = alert.into_alert(Uuid::new_v4());

        sqlx::query(
            r#"
            INSERT INTO billing_alerts (
                id, account_id, accumulated_cost, threshold, cycle_start, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(alert.account_id.to_string())
        .bind(alert.accumulated_cost)
        .bind(alert.threshold)
        .bind(alert.cycle_start)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!(
                    "Billing alert already raised for account '{}' in this cycle",
                    alert.account_id
                ))
            }
            _ => DbError::from(e),
        })?;

        Ok(alert)
    }

    async fn find_in_cycle(
        &self,
        account_id: Uuid,
        cycle_start: DateTime<Utc>,
    ) -> DbResult<Option<BillingAlert>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, accumulated_cost, threshold, cycle_start, created_at
            FROM billing_alerts
            WHERE account_id = ? AND cycle_start = ?
            "#,
        )
        .bind(account_id.to_string())
        .bind(cycle_start)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_alert).transpose()
    }

    async fn list_by_account(&self, account_id: Uuid) -> DbResult<Vec<BillingAlert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, accumulated_cost, threshold, cycle_start, created_at
            FROM billing_alerts
            WHERE account_id = ?
            ORDER BY cycle_start DESC
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_alert).collect()
    }
}
