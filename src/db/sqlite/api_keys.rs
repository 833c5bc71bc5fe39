use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::{
    accounts::parse_account,
    common::{from_db_count, parse_uuid},
};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::ApiKeyRepo,
    },
    models::{ApiKey, ApiKeyWithAccount, CreateApiKey},
};

pub struct SqliteApiKeyRepo {
    pool: SqlitePool,
}

const KEY_COLUMNS: &str =
    "id, account_id, name, key_prefix, active, expires_at, last_used_at, usage_count, created_at";

impl SqliteApiKeyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_api_key(row: &SqliteRow) -> DbResult<ApiKey> {
        Ok(ApiKey {
            id: parse_uuid(row.get("id"))?,
            account_id: parse_uuid(row.get("account_id"))?,
            name: row.get("name"),
            key_prefix: row.get("key_prefix"),
            active: row.get("active"),
            expires_at: row.get("expires_at"),
            last_used_at: row.get("last_used_at"),
            usage_count: from_db_count(row.get("usage_count")),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ApiKeyRepo for SqliteApiKeyRepo {
    async fn create(
        &self,
        input: CreateApiKey,
        key_hash: &str,
        key_prefix: &str,
        now: DateTime<Utc>,
    ) -> DbResult<ApiKey> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO api_keys (
                id, account_id, name, key_hash, key_prefix, active,
                expires_at, usage_count, created_at
            )
            VALUES (?, ?, ?, ?, ?, 1, ?, 0, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(input.account_id.to_string())
        .bind(&input.name)
        .bind(key_hash)
        .bind(key_prefix)
        .bind(input.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict("API key with this hash already exists".to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                DbError::Validation(format!("Account '{}' does not exist", input.account_id))
            }
            _ => DbError::from(e),
        })?;

        Ok(ApiKey {
            id,
            account_id: input.account_id,
            name: input.name,
            key_prefix: key_prefix.to_string(),
            active: true,
            expires_at: input.expires_at,
            last_used_at: None,
            usage_count: 0,
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ApiKey>> {
        let query = format!("SELECT {} FROM api_keys WHERE id = ?", KEY_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::parse_api_key).transpose()
    }

    async fn get_by_hash(&self, key_hash: &str) -> DbResult<Option<ApiKeyWithAccount>> {
        let row = sqlx::query(
            r#"
            SELECT
                k.id, k.account_id, k.name, k.key_prefix, k.active, k.expires_at,
                k.last_used_at, k.usage_count, k.created_at,
                a.id AS acct_id, a.name AS acct_name, a.tier AS acct_tier,
                a.status AS acct_status, a.call_allowance AS acct_call_allowance,
                a.calls_consumed AS acct_calls_consumed,
                a.prediction_allowance AS acct_prediction_allowance,
                a.predictions_consumed AS acct_predictions_consumed,
                a.cycle_start AS acct_cycle_start, a.cycle_end AS acct_cycle_end,
                a.created_at AS acct_created_at, a.updated_at AS acct_updated_at
            FROM api_keys k
            JOIN accounts a ON a.id = k.account_id
            WHERE k.key_hash = ?
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(ApiKeyWithAccount {
            key: Self::parse_api_key(&row)?,
            account: parse_account(&row, "acct_")?,
        }))
    }

    async fn list_by_account(&self, account_id: Uuid) -> DbResult<Vec<ApiKey>> {
        let query = format!(
            "SELECT {} FROM api_keys WHERE account_id = ? ORDER BY created_at DESC, id DESC",
            KEY_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::parse_api_key).collect()
    }

    async fn record_use(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET last_used_at = ?, usage_count = usage_count + 1
            WHERE id = ?
            "#,
        )
        .bind(at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> DbResult<()> {
        let result = sqlx::query("UPDATE api_keys SET active = 0 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
