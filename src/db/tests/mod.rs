//! Shared database repository test infrastructure
//!
//! Each repository has a test module containing shared test functions that
//! take a `&DbPool`. The `backend_tests!` macro instantiates every shared test
//! once per backend:
//!
//! - **Memory**: always runs
//! - **SQLite**: in-memory databases with real migrations, behind `database-sqlite`

mod accounts;
mod api_keys;
mod billing_alerts;
pub mod harness;

/// Generate `memory` and `sqlite` test modules that run the listed shared tests.
macro_rules! backend_tests {
    ($($name:ident),* $(,)?) => {
        mod memory_tests {
            use crate::db::DbPool;

            $(
                #[tokio::test]
                async fn $name() {
                    let db = DbPool::in_memory();
                    super::$name(&db).await;
                }
            )*
        }

        #[cfg(feature = "database-sqlite")]
        mod sqlite_tests {
            use crate::db::tests::harness::sqlite_db;

            $(
                #[tokio::test]
                async fn $name() {
                    let db = sqlite_db().await;
                    super::$name(&db).await;
                }
            )*
        }
    };
}

pub(crate) use backend_tests;

#[cfg(feature = "database-sqlite")]
mod sqlite_file {
    use super::harness::create_account;
    use crate::{
        config::{DatabaseConfig, SqliteConfig},
        db::DbPool,
        models::PlanTier,
    };

    fn config(path: &std::path::Path) -> DatabaseConfig {
        DatabaseConfig::Sqlite(SqliteConfig {
            path: path.to_string_lossy().into_owned(),
            create_if_missing: true,
            run_migrations: true,
            wal_mode: true,
            busy_timeout_ms: 5000,
            max_connections: 2,
        })
    }

    #[tokio::test]
    async fn test_accounts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tollgate.db");

        let db = DbPool::from_config(&config(&path)).await.unwrap();
        assert_eq!(db.backend_name(), "sqlite");
        let account = create_account(&db, "acme", PlanTier::Professional).await;
        db.close().await;

        // Migrations are idempotent on an existing file
        let db = DbPool::from_config(&config(&path)).await.unwrap();
        let reloaded = db.accounts().get(account.id).await.unwrap().unwrap();
        assert_eq!(reloaded.tier, PlanTier::Professional);
        db.ping().await.unwrap();
    }
}
