use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::AccountPlanState;

/// A stored credential. Only the hash of the raw key is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    /// Leading characters of the key (for identification without exposing the key)
    pub key_prefix: String,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Lifetime count of successful authentications
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

/// A credential together with its owning account, resolved in one read.
#[derive(Debug, Clone)]
pub struct ApiKeyWithAccount {
    pub key: ApiKey,
    pub account: AccountPlanState,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKey {
    pub account_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Returned once on issuance; the raw key is never stored.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub api_key: ApiKey,
    pub key: String,
}

/// Number of leading key characters kept for display.
pub const KEY_PREFIX_DISPLAY_LEN: usize = 12;

pub fn display_prefix(raw_key: &str) -> String {
    raw_key.chars().take(KEY_PREFIX_DISPLAY_LEN).collect()
}
