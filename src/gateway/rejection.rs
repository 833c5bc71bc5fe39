use axum::{http::StatusCode, response::Response};
use rust_decimal::Decimal;

use crate::{auth::AuthError, error::ErrorResponse, observability::metrics};

/// Why the pipeline stopped before serving a request.
#[derive(Debug)]
pub enum Rejection {
    Auth(AuthError),
    RateLimited {
        retry_after_secs: u64,
    },
    InsufficientBalance {
        available: Decimal,
        unit_cost: Decimal,
    },
    /// The balance could not be read; treated as a denial.
    BalanceUnverified,
    /// The downstream handler could not be reached.
    Downstream(String),
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::Auth(e) => e.kind(),
            Rejection::RateLimited { .. } => "rate_limited",
            Rejection::InsufficientBalance { .. } | Rejection::BalanceUnverified => {
                "insufficient_balance"
            }
            Rejection::Downstream(_) => "downstream_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Auth(e) => e.status(),
            Rejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::InsufficientBalance { .. } | Rejection::BalanceUnverified => {
                StatusCode::PAYMENT_REQUIRED
            }
            Rejection::Downstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn to_body(&self) -> ErrorResponse {
        match self {
            Rejection::Auth(e) => e.to_body(),
            Rejection::RateLimited { retry_after_secs } => {
                ErrorResponse::new(self.kind(), "Rate limit exceeded")
                    .with_retry_after(*retry_after_secs)
            }
            Rejection::InsufficientBalance {
                available,
                unit_cost,
            } => ErrorResponse::new(self.kind(), "Insufficient balance for this operation")
                .with_balance(*available, *unit_cost),
            Rejection::BalanceUnverified => {
                ErrorResponse::new(self.kind(), "Balance could not be verified")
            }
            Rejection::Downstream(_) => {
                ErrorResponse::new(self.kind(), "The upstream service could not be reached")
            }
        }
    }

    pub fn into_response(self) -> Response {
        metrics::record_gateway_rejection(self.kind());
        self.to_body().into_response_with(self.status())
    }
}

impl From<AuthError> for Rejection {
    fn from(e: AuthError) -> Self {
        Rejection::Auth(e)
    }
}
