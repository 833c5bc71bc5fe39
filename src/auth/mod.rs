mod api_key;
mod error;
mod identity;

pub use api_key::{KeyAuthenticator, extract_credential};
pub use error::AuthError;
pub use identity::Identity;
