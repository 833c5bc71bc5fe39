//! API key authentication.
//!
//! Keys arrive in the configured key header (default `X-API-Key`) or as an
//! `Authorization: Bearer` token. When both are present the key header wins.
//! Only the SHA-256 hash of a key is ever stored or looked up.

use std::sync::Arc;

use http::HeaderMap;

use super::{AuthError, Identity};
use crate::{
    clock::Clock,
    config::AuthConfig,
    db::ApiKeyRepo,
    models::{has_valid_prefix, hash_api_key},
    observability::metrics,
};

/// Pull the raw credential out of request headers.
///
/// An empty key header is treated as absent. A non-bearer `Authorization`
/// scheme is not a credential this gateway understands, so it also reads as
/// missing.
pub fn extract_credential(headers: &HeaderMap, config: &AuthConfig) -> Result<String, AuthError> {
    if let Some(h) = headers.get(config.header_name.as_str()) {
        let value = h.to_str().map_err(|_| AuthError::InvalidCredential)?.trim();
        if !value.is_empty() {
            return Ok(value.to_string());
        }
    }

    let Some(h) = headers.get(http::header::AUTHORIZATION) else {
        return Err(AuthError::MissingCredential);
    };
    let value = h.to_str().map_err(|_| AuthError::InvalidCredential)?;
    // ASCII case-insensitive scheme match without allocating
    if value.len() >= 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        let token = value[7..].trim();
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        return Ok(token.to_string());
    }

    Err(AuthError::MissingCredential)
}

/// Validates credentials against stored key records and the owning account.
pub struct KeyAuthenticator {
    api_keys: Arc<dyn ApiKeyRepo>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
}

impl KeyAuthenticator {
    pub fn new(api_keys: Arc<dyn ApiKeyRepo>, clock: Arc<dyn Clock>, config: AuthConfig) -> Self {
        Self {
            api_keys,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Resolve a credential to an identity without touching the key record.
    pub async fn verify(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let result = self.resolve(credential).await;
        match &result {
            Ok(_) => metrics::record_auth_attempt("success"),
            Err(e) => metrics::record_auth_attempt(e.kind()),
        }
        result
    }

    async fn resolve(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let raw_key = credential
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        // Constant-time so the prefix check does not leak how much matched
        if !has_valid_prefix(raw_key, &self.config.key_prefix) {
            return Err(AuthError::InvalidCredential);
        }

        let key_hash = hash_api_key(raw_key);
        let record = self
            .api_keys
            .get_by_hash(&key_hash)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Credential lookup failed");
                metrics::record_infrastructure_fault("account_store", "get_api_key");
                AuthError::Internal(e.to_string())
            })?
            .ok_or(AuthError::InvalidCredential)?;

        let key = record.key;
        if !key.active {
            tracing::debug!(api_key_id = %key.id, "Rejected deactivated API key");
            return Err(AuthError::InactiveCredential);
        }
        if key.is_expired_at(self.clock.now()) {
            tracing::debug!(api_key_id = %key.id, "Rejected expired API key");
            return Err(AuthError::ExpiredCredential);
        }
        if !record.account.status.is_active() {
            tracing::debug!(
                api_key_id = %key.id,
                account_id = %record.account.id,
                status = %record.account.status,
                "Rejected API key for inactive plan"
            );
            return Err(AuthError::InactivePlan);
        }

        Ok(Identity {
            api_key_id: key.id,
            account_id: key.account_id,
            key_prefix: key.key_prefix,
            plan: record.account,
        })
    }

    /// Refresh last-used time and bump the lifetime counter.
    ///
    /// Failures are logged and otherwise ignored; the request has already
    /// been admitted.
    pub async fn record_use(&self, identity: &Identity) {
        if let Err(e) = self
            .api_keys
            .record_use(identity.api_key_id, self.clock.now())
            .await
        {
            tracing::warn!(
                api_key_id = %identity.api_key_id,
                error = %e,
                "Failed to record API key use"
            );
            metrics::record_infrastructure_fault("account_store", "record_key_use");
        }
    }

    /// `verify` followed by `record_use` on success.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let identity = self.verify(credential).await?;
        self.record_use(&identity).await;
        Ok(identity)
    }
}
