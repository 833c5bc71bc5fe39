use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{from_db_count, parse_decimal, parse_enum, parse_uuid, to_db_count};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{UsageRepo, fold_totals},
    },
    models::{BillingCycle, KindTotal, NewUsageEntry, OperationKind, UsageLedgerEntry},
};

pub struct SqliteUsageRepo {
    pool: SqlitePool,
}

impl SqliteUsageRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_entry(row: &SqliteRow) -> DbResult<UsageLedgerEntry> {
        let api_key_id: Option<String> = row.get("api_key_id");
        let metadata: String = row.get("metadata");
        Ok(UsageLedgerEntry {
            id: parse_uuid(row.get("id"))?,
            account_id: parse_uuid(row.get("account_id"))?,
            api_key_id: api_key_id.as_deref().map(parse_uuid).transpose()?,
            kind: parse_enum(row.get("kind"))?,
            price_class: parse_enum(row.get("price_class"))?,
            quantity: from_db_count(row.get("quantity")),
            unit_price: parse_decimal(row.get("unit_price"))?,
            cost: parse_decimal(row.get("cost"))?,
            origin: row.get("origin"),
            metadata: serde_json::from_str(&metadata)?,
            recorded_at: row.get("recorded_at"),
        })
    }
}

#[async_trait]
impl UsageRepo for SqliteUsageRepo {
    async fn append(&self, entry: NewUsageEntry) -> DbResult<UsageLedgerEntry> {
        let entry = entry.into_entry(Uuid::new_v4());
        let metadata = serde_json::to_string(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO usage_ledger (
                id, account_id, api_key_id, kind, price_class, quantity,
                unit_price, cost, origin, metadata, recorded_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.account_id.to_string())
        .bind(entry.api_key_id.map(|id| id.to_string()))
        .bind(entry.kind.as_str())
        .bind(entry.price_class.as_str())
        .bind(to_db_count(entry.quantity))
        .bind(entry.unit_price.to_string())
        .bind(entry.cost.to_string())
        .bind(&entry.origin)
        .bind(metadata)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                DbError::Validation(format!("Account '{}' does not exist", entry.account_id))
            }
            _ => DbError::from(e),
        })?;

        Ok(entry)
    }

    async fn cycle_totals(
        &self,
        account_id: Uuid,
        cycle: BillingCycle,
        exclude: Option<Uuid>,
    ) -> DbResult<Vec<KindTotal>> {
        // Costs are decimal strings, so they are summed here rather than in SQL
        let rows = sqlx::query(
            r#"
            SELECT kind, quantity, cost
            FROM usage_ledger
            WHERE account_id = ? AND recorded_at >= ? AND recorded_at < ?
              AND (? IS NULL OR id != ?)
            "#,
        )
        .bind(account_id.to_string())
        .bind(cycle.start)
        .bind(cycle.end)
        .bind(exclude.map(|id| id.to_string()))
        .bind(exclude.map(|id| id.to_string()))
        .fetch_all(&self.pool)
        .await?;

        let parsed = rows
            .iter()
            .map(|row| {
                Ok((
                    parse_enum::<OperationKind>(row.get("kind"))?,
                    from_db_count(row.get("quantity")),
                    parse_decimal(row.get("cost"))?,
                ))
            })
            .collect::<DbResult<Vec<_>>>()?;

        Ok(fold_totals(parsed))
    }

    async fn list_recent(&self, account_id: Uuid, limit: usize) -> DbResult<Vec<UsageLedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, api_key_id, kind, price_class, quantity,
                   unit_price, cost, origin, metadata, recorded_at
            FROM usage_ledger
            WHERE account_id = ?
            ORDER BY recorded_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(account_id.to_string())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_entry).collect()
    }
}
