mod account;
mod api_key;
mod api_key_gen;
mod billing_alert;
mod usage;

pub use account::*;
pub use api_key::*;
pub use api_key_gen::*;
pub use billing_alert::*;
pub use usage::*;
