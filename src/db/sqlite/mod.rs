mod accounts;
mod api_keys;
mod billing_alerts;
mod common;
mod usage;

pub use accounts::SqliteAccountRepo;
pub use api_keys::SqliteApiKeyRepo;
pub use billing_alerts::SqliteBillingAlertRepo;
pub use usage::SqliteUsageRepo;
