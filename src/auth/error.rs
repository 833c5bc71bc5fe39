use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{error::ErrorResponse, observability::metrics};

#[derive(Debug)]
pub enum AuthError {
    /// Neither the key header nor a bearer token was present
    MissingCredential,

    /// Unknown key, wrong prefix, or a header that is not valid text
    InvalidCredential,

    /// Key exists but has been deactivated
    InactiveCredential,

    /// Key exists but its expiry has passed
    ExpiredCredential,

    /// Key is valid but the owning account's plan is not active
    InactivePlan,

    /// The credential store could not be read
    Internal(String),
}

impl AuthError {
    /// Machine-readable kind used in rejection bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::InactiveCredential => "inactive_credential",
            AuthError::ExpiredCredential => "expired_credential",
            AuthError::InactivePlan => "inactive_plan",
            AuthError::Internal(_) => "infrastructure_fault",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InactivePlan => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn to_body(&self) -> ErrorResponse {
        let message = match self {
            // Store details stay in the logs
            AuthError::Internal(_) => "Authentication is temporarily unavailable".to_string(),
            other => other.to_string(),
        };
        ErrorResponse::new(self.kind(), message)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        metrics::record_gateway_rejection(self.kind());
        self.to_body().into_response_with(self.status())
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingCredential => write!(f, "API key required"),
            AuthError::InvalidCredential => write!(f, "Invalid API key"),
            AuthError::InactiveCredential => write!(f, "API key has been deactivated"),
            AuthError::ExpiredCredential => write!(f, "API key has expired"),
            AuthError::InactivePlan => write!(f, "Subscription is not active"),
            AuthError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}
