mod accounts;
mod api_keys;
mod billing_alerts;
mod usage;

pub use accounts::*;
pub use api_keys::*;
pub use billing_alerts::*;
pub use usage::*;

/// Default page size for list queries.
pub const DEFAULT_LIST_LIMIT: usize = 100;
