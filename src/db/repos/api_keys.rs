use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{ApiKey, ApiKeyWithAccount, CreateApiKey},
};

#[async_trait]
pub trait ApiKeyRepo: Send + Sync {
    async fn create(
        &self,
        input: CreateApiKey,
        key_hash: &str,
        key_prefix: &str,
        now: DateTime<Utc>,
    ) -> DbResult<ApiKey>;
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ApiKey>>;

    /// Resolve a key hash to the key and its owning account.
    ///
    /// Inactive and expired keys are returned as-is; rejecting them is the
    /// authenticator's job so it can report the precise reason.
    async fn get_by_hash(&self, key_hash: &str) -> DbResult<Option<ApiKeyWithAccount>>;

    async fn list_by_account(&self, account_id: Uuid) -> DbResult<Vec<ApiKey>>;

    /// Stamp `last_used_at` and bump the usage count.
    async fn record_use(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    async fn deactivate(&self, id: Uuid) -> DbResult<()>;
}
