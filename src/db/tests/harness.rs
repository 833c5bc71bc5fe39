//! Test harness for database repository testing
//!
//! Provides utilities for setting up test databases:
//! - Memory: the process-local store
//! - SQLite: Fast in-memory databases with real migrations

use chrono::{DateTime, Duration, TimeZone, Utc};
#[cfg(feature = "database-sqlite")]
use sqlx::SqlitePool;

use crate::{
    db::DbPool,
    models::{AccountPlanState, Allowance, CreateAccount, PlanStatus, PlanTier},
};

/// Create an in-memory SQLite pool for testing
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// Run SQLite migrations on the pool
///
/// Uses the actual migration files to ensure tests match production schema
#[cfg(feature = "database-sqlite")]
pub async fn run_sqlite_migrations(pool: &SqlitePool) {
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(pool)
        .await
        .expect("Failed to run SQLite migrations");
}

#[cfg(feature = "database-sqlite")]
pub async fn sqlite_db() -> DbPool {
    let pool = create_sqlite_pool().await;
    run_sqlite_migrations(&pool).await;
    DbPool::from_sqlite(pool)
}

/// Fixed cycle start used across repository tests
pub fn cycle_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

pub fn account_input(name: &str, tier: PlanTier) -> CreateAccount {
    CreateAccount {
        id: None,
        name: name.to_string(),
        tier,
        status: PlanStatus::Active,
        call_allowance: Allowance::Limited(1_000),
        prediction_allowance: Allowance::Limited(50),
        cycle_start: cycle_start(),
        cycle_end: cycle_start() + Duration::days(30),
    }
}

pub async fn create_account(db: &DbPool, name: &str, tier: PlanTier) -> AccountPlanState {
    db.accounts()
        .create(account_input(name, tier), cycle_start())
        .await
        .expect("Failed to create test account")
}
