mod error;
pub mod memory;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use repos::*;

use crate::config::DatabaseConfig;

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    accounts: Arc<dyn AccountRepo>,
    api_keys: Arc<dyn ApiKeyRepo>,
    usage: Arc<dyn UsageRepo>,
    billing_alerts: Arc<dyn BillingAlertRepo>,
}

enum PoolStorage {
    Memory,
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
}

/// Storage handle for accounts, credentials, the usage ledger and alerts.
///
/// Repositories are cached at construction time to avoid allocation on each access.
pub struct DbPool {
    inner: PoolStorage,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a pool backed by process-local maps.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        DbPool {
            inner: PoolStorage::Memory,
            repos: CachedRepos {
                accounts: store.clone(),
                api_keys: store.clone(),
                usage: store.clone(),
                billing_alerts: store,
            },
        }
    }

    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        let repos = CachedRepos {
            accounts: Arc::new(sqlite::SqliteAccountRepo::new(pool.clone())),
            api_keys: Arc::new(sqlite::SqliteApiKeyRepo::new(pool.clone())),
            usage: Arc::new(sqlite::SqliteUsageRepo::new(pool.clone())),
            billing_alerts: Arc::new(sqlite::SqliteBillingAlertRepo::new(pool.clone())),
        };
        DbPool {
            inner: PoolStorage::Sqlite(pool),
            repos,
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::Memory => {
                tracing::warn!("Using in-memory storage; accounts and usage are lost on restart");
                Ok(Self::in_memory())
            }
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .foreign_keys(true)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                let db = Self::from_sqlite(pool);
                if cfg.run_migrations {
                    db.run_migrations().await?;
                }
                Ok(db)
            }
        }
    }

    /// Run database migrations using sqlx's migration runner.
    /// A no-op for in-memory storage.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            PoolStorage::Memory => Ok(()),
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
        }
    }

    /// Cheap liveness probe for health checks.
    pub async fn ping(&self) -> DbResult<()> {
        match &self.inner {
            PoolStorage::Memory => Ok(()),
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.inner {
            PoolStorage::Memory => "memory",
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(_) => "sqlite",
        }
    }

    pub fn accounts(&self) -> Arc<dyn AccountRepo> {
        Arc::clone(&self.repos.accounts)
    }

    pub fn api_keys(&self) -> Arc<dyn ApiKeyRepo> {
        Arc::clone(&self.repos.api_keys)
    }

    pub fn usage(&self) -> Arc<dyn UsageRepo> {
        Arc::clone(&self.repos.usage)
    }

    pub fn billing_alerts(&self) -> Arc<dyn BillingAlertRepo> {
        Arc::clone(&self.repos.billing_alerts)
    }

    /// Close the underlying pool, waiting for in-flight queries.
    pub async fn close(&self) {
        match &self.inner {
            PoolStorage::Memory => {}
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.close().await,
        }
    }
}
