//! JSON body shared by every rejection the gateway produces.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Response extension set on bodies the gateway wrote itself, as opposed to
/// responses passed through from the upstream.
#[derive(Debug, Clone, Copy)]
pub struct GatewayAuthored;

/// Rejection payload: `{"error": "<kind>", "message": "..."}` plus balance
/// details for `insufficient_balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Machine-readable error kind (e.g. `rate_limited`)
    pub error: String,
    pub message: String,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub available_balance: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub cost_per_prediction: Option<Decimal>,
    /// Seconds until the caller may retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            available_balance: None,
            cost_per_prediction: None,
            retry_after: None,
        }
    }

    pub fn with_balance(mut self, available: Decimal, unit_cost: Decimal) -> Self {
        self.available_balance = Some(available);
        self.cost_per_prediction = Some(unit_cost);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn into_response_with(self, status: StatusCode) -> Response {
        let mut response = (status, Json(self)).into_response();
        response.extensions_mut().insert(GatewayAuthored);
        response
    }
}
