use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ConfigError;
use crate::models::{Allowance, PlanStatus, PlanTier};

/// Accounts and keys seeded at startup.
///
/// ```toml
/// [[bootstrap.accounts]]
/// name = "acme"
/// tier = "basic"
/// call_allowance = 10000
/// prediction_allowance = 50
///
/// [[bootstrap.accounts.keys]]
/// name = "ci"
/// key = "${ACME_API_KEY}"
/// ```
///
/// Seeding is idempotent: an account whose id already exists and a key whose
/// hash is already stored are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub accounts: Vec<BootstrapAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapAccount {
    /// Derived from `name` when omitted, so restarts map to the same account.
    #[serde(default)]
    pub id: Option<Uuid>,

    pub name: String,

    pub tier: PlanTier,

    #[serde(default = "default_status")]
    pub status: PlanStatus,

    /// `-1` for unlimited.
    #[serde(default = "default_allowance")]
    pub call_allowance: Allowance,

    /// `-1` for unlimited.
    #[serde(default = "default_allowance")]
    pub prediction_allowance: Allowance,

    #[serde(default = "default_cycle_days")]
    pub cycle_days: u32,

    #[serde(default)]
    pub keys: Vec<BootstrapKey>,
}

impl BootstrapAccount {
    pub fn account_id(&self) -> Uuid {
        self.id
            .unwrap_or_else(|| Uuid::new_v5(&Uuid::NAMESPACE_OID, self.name.as_bytes()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapKey {
    pub name: String,

    /// Raw key. Only its hash is stored.
    pub key: String,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl BootstrapConfig {
    pub fn validate(&self, key_prefix: &str) -> Result<(), ConfigError> {
        for account in &self.accounts {
            if account.name.is_empty() {
                return Err(ConfigError::Validation(
                    "bootstrap account name cannot be empty".into(),
                ));
            }
            if account.cycle_days == 0 {
                return Err(ConfigError::Validation(format!(
                    "bootstrap account '{}' cycle_days must be greater than 0",
                    account.name
                )));
            }
            for key in &account.keys {
                if !key.key.starts_with(key_prefix) {
                    return Err(ConfigError::Validation(format!(
                        "bootstrap key '{}' for account '{}' must start with '{}'",
                        key.name, account.name, key_prefix
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_status() -> PlanStatus {
    PlanStatus::Active
}

fn default_allowance() -> Allowance {
    Allowance::Limited(0)
}

fn default_cycle_days() -> u32 {
    30
}
