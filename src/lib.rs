//! Tollgate: an access gateway in front of a metered API.
//!
//! Every request under `/v1` is authenticated by API key, counted against a
//! per-plan sliding window, checked against the account's remaining balance,
//! dispatched, and on success metered into the usage ledger. Spend that
//! crosses the billing threshold raises one alert per cycle.

pub mod alert_sink;
mod app;
pub mod auth;
pub mod billing_queue;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gateway;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod routes;
pub mod services;

pub use app::{AppState, StartupError, build_app};
