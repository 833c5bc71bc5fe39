use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::{BootstrapAccount, BootstrapConfig},
    db::{DbError, DbPool, DbResult},
    models::{CreateAccount, CreateApiKey, display_prefix, hash_api_key},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    pub accounts_created: usize,
    pub keys_created: usize,
}

/// Seed configured accounts and pre-shared keys.
///
/// Safe to run on every startup: accounts are matched by id and keys by hash,
/// and existing records are left untouched.
pub async fn seed(
    db: &DbPool,
    config: &BootstrapConfig,
    now: DateTime<Utc>,
) -> DbResult<BootstrapReport> {
    let mut report = BootstrapReport::default();

    for account in &config.accounts {
        let account_id = account.account_id();
        if db.accounts().get(account_id).await?.is_none() {
            let input = account_input(account, account_id, now);
            input
                .validate()
                .map_err(|e| DbError::Validation(e.to_string()))?;
            db.accounts().create(input, now).await?;
            report.accounts_created += 1;
            tracing::info!(
                %account_id,
                name = %account.name,
                tier = %account.tier,
                "Seeded account"
            );
        }

        for key in &account.keys {
            let hash = hash_api_key(&key.key);
            if db.api_keys().get_by_hash(&hash).await?.is_some() {
                continue;
            }
            let input = CreateApiKey {
                account_id,
                name: key.name.clone(),
                expires_at: key.expires_at,
            };
            input
                .validate()
                .map_err(|e| DbError::Validation(e.to_string()))?;
            let created = db
                .api_keys()
                .create(input, &hash, &display_prefix(&key.key), now)
                .await?;
            report.keys_created += 1;
            tracing::info!(
                api_key_id = %created.id,
                %account_id,
                prefix = %created.key_prefix,
                "Seeded API key"
            );
        }
    }

    Ok(report)
}

fn account_input(account: &BootstrapAccount, id: Uuid, now: DateTime<Utc>) -> CreateAccount {
    CreateAccount {
        id: Some(id),
        name: account.name.clone(),
        tier: account.tier,
        status: account.status,
        call_allowance: account.call_allowance,
        prediction_allowance: account.prediction_allowance,
        cycle_start: now,
        cycle_end: now + Duration::days(i64::from(account.cycle_days)),
    }
}
