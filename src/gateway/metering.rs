//! What a served request is billed as.

use std::collections::HashMap;

use axum::{
    extract::Query,
    http::{Method, Uri, header::CONTENT_LENGTH},
    response::Response,
};

use crate::{
    config::MeteredRoute,
    models::{OperationKind, UsageMetadata},
};

/// Request line details needed to meter a request after it is served.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    /// Caller network address, if known
    pub client_addr: Option<String>,
}

impl RequestInfo {
    pub fn new(method: Method, uri: Uri, client_addr: Option<String>) -> Self {
        Self {
            method,
            uri,
            client_addr,
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    fn query_param(&self, name: &str) -> Option<String> {
        Query::<HashMap<String, String>>::try_from_uri(&self.uri)
            .ok()
            .and_then(|Query(mut params)| params.remove(name))
            .filter(|v| !v.is_empty())
    }

    /// Last non-empty path segment below the route prefix.
    fn trailing_segment(&self, route: &MeteredRoute) -> Option<String> {
        self.path()
            .strip_prefix(route.path_prefix.as_str())
            .unwrap_or_default()
            .rsplit('/')
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Build ledger metadata for a request served under `route`.
///
/// - predictions: `?symbol=` or the trailing path segment
/// - exports: `?format=` or the trailing segment's extension, sized by the
///   response `Content-Length`
pub fn usage_metadata(route: &MeteredRoute, request: &RequestInfo, response: &Response) -> UsageMetadata {
    match route.kind {
        OperationKind::ApiCall => UsageMetadata::ApiCall {
            endpoint: request.path().to_string(),
            method: request.method.to_string(),
        },
        OperationKind::Prediction => UsageMetadata::Prediction {
            symbol: request
                .query_param("symbol")
                .or_else(|| request.trailing_segment(route))
                .map(|s| s.to_uppercase())
                .unwrap_or_default(),
        },
        OperationKind::Export => UsageMetadata::Export {
            format: request
                .query_param("format")
                .or_else(|| {
                    request
                        .trailing_segment(route)
                        .and_then(|s| s.rsplit_once('.').map(|(_, ext)| ext.to_string()))
                })
                .unwrap_or_else(|| "json".to_string()),
            size_bytes: response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        },
    }
}
