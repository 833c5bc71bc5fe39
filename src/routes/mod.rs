pub mod account;
pub mod health;
mod proxy;

pub use proxy::forward;
