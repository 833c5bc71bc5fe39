use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{from_db_count, parse_enum, parse_uuid, to_db_count};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{AccountRepo, apply_increment},
    },
    models::{AccountPlanState, Allowance, CreateAccount, PlanStatus, PlanTier, UsageCounter},
};

pub struct SqliteAccountRepo {
    pool: SqlitePool,
}

pub(super) const ACCOUNT_COLUMNS: &str = "id, name, tier, status, call_allowance, calls_consumed, \
     prediction_allowance, predictions_consumed, cycle_start, cycle_end, created_at, updated_at";

/// Parse an account from a row whose account columns carry `prefix`.
pub(super) fn parse_account(row: &SqliteRow, prefix: &str) -> DbResult<AccountPlanState> {
    let col = |name: &str| format!("{}{}", prefix, name);
    Ok(AccountPlanState {
        id: parse_uuid(row.get(col("id").as_str()))?,
        name: row.get(col("name").as_str()),
        tier: parse_enum(row.get(col("tier").as_str()))?,
        status: parse_enum(row.get(col("status").as_str()))?,
        call_allowance: Allowance::from_i64(row.get(col("call_allowance").as_str())),
        calls_consumed: from_db_count(row.get(col("calls_consumed").as_str())),
        prediction_allowance: Allowance::from_i64(row.get(col("prediction_allowance").as_str())),
        predictions_consumed: from_db_count(row.get(col("predictions_consumed").as_str())),
        cycle_start: row.get(col("cycle_start").as_str()),
        cycle_end: row.get(col("cycle_end").as_str()),
        created_at: row.get(col("created_at").as_str()),
        updated_at: row.get(col("updated_at").as_str()),
    })
}

impl SqliteAccountRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch<'e, E>(executor: E, id: Uuid) -> DbResult<Option<AccountPlanState>>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let query = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(executor)
            .await?;
        row.map(|r| parse_account(&r, "")).transpose()
    }
}

#[async_trait]
impl AccountRepo for SqliteAccountRepo {
    async fn create(&self, input: CreateAccount, now: DateTime<Utc>) -> DbResult<AccountPlanState> {
        let id = input.id.unwrap_or_else(Uuid::new_v4);

        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, name, tier, status, call_allowance, calls_consumed,
                prediction_allowance, predictions_consumed, cycle_start, cycle_end,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, 0, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.name)
        .bind(input.tier.as_str())
        .bind(input.status.as_str())
        .bind(input.call_allowance.to_i64())
        .bind(input.prediction_allowance.to_i64())
        .bind(input.cycle_start)
        .bind(input.cycle_end)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!("Account '{}' already exists", id))
            }
            _ => DbError::from(e),
        })?;

        Ok(AccountPlanState {
            id,
            name: input.name,
            tier: input.tier,
            status: input.status,
            call_allowance: input.call_allowance,
            calls_consumed: 0,
            prediction_allowance: input.prediction_allowance,
            predictions_consumed: 0,
            cycle_start: input.cycle_start,
            cycle_end: input.cycle_end,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<AccountPlanState>> {
        Self::fetch(&self.pool, id).await
    }

    async fn list(&self) -> DbResult<Vec<AccountPlanState>> {
        let query = format!(
            "SELECT {} FROM accounts ORDER BY created_at ASC, id ASC",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(|r| parse_account(r, "")).collect()
    }

    async fn increment_consumed(
        &self,
        id: Uuid,
        counter: UsageCounter,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> DbResult<AccountPlanState> {
        let mut tx = self.pool.begin().await?;

        // Take the write lock before reading so concurrent increments serialize
        let touched = sqlx::query("UPDATE accounts SET updated_at = updated_at WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        let mut account = Self::fetch(&mut *tx, id).await?.ok_or(DbError::NotFound)?;
        apply_increment(&mut account, counter, quantity, now);

        sqlx::query(
            r#"
            UPDATE accounts
            SET calls_consumed = ?, predictions_consumed = ?,
                cycle_start = ?, cycle_end = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(to_db_count(account.calls_consumed))
        .bind(to_db_count(account.predictions_consumed))
        .bind(account.cycle_start)
        .bind(account.cycle_end)
        .bind(account.updated_at)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(account)
    }

    async fn update_plan(
        &self,
        id: Uuid,
        tier: PlanTier,
        status: PlanStatus,
        now: DateTime<Utc>,
    ) -> DbResult<AccountPlanState> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET tier = ?, status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(tier.as_str())
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Self::fetch(&self.pool, id).await?.ok_or(DbError::NotFound)
    }
}
