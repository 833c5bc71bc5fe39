//! Request ID middleware for request correlation.
//!
//! Propagates the caller's `X-Request-Id` or generates one, records it on the
//! request span and echoes it on the response.

use axum::{
    body::Body,
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::GatewayAuthored;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Longest caller-supplied id that is propagated as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Extension containing the request ID for the current request.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Use the incoming header when it is printable and short, otherwise
    /// generate a fresh id.
    fn from_request(req: &Request) -> Self {
        req.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty() && s.len() <= MAX_REQUEST_ID_LEN)
            .map(|s| Self(s.to_string()))
            .unwrap_or_default()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = RequestId::from_request(&req);
    req.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let response = next.run(req).instrument(span).await;
    let mut response = inject_request_id_into_error(response, &request_id).await;

    if let Ok(value) = request_id.0.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Add a top-level `requestId` to JSON error bodies the gateway wrote.
///
/// Upstream responses are left untouched even when they look like errors.
async fn inject_request_id_into_error(response: Response, request_id: &RequestId) -> Response {
    if response.extensions().get::<GatewayAuthored>().is_none() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return (parts, Body::empty()).into_response(),
    };

    let modified = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(mut object)) => {
            object.insert(
                "requestId".to_string(),
                serde_json::Value::String(request_id.0.clone()),
            );
            serde_json::to_vec(&object).unwrap_or_else(|_| bytes.to_vec())
        }
        _ => bytes.to_vec(),
    };

    let mut response = Response::from_parts(parts, Body::from(modified));
    // Length changed
    response.headers_mut().remove(http::header::CONTENT_LENGTH);
    response
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        http::{StatusCode, header::CONTENT_TYPE},
        middleware,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::error::ErrorResponse;

    fn app() -> Router {
        Router::new()
            .route(
                "/rejected",
                get(|| async {
                    ErrorResponse::new("rate_limited", "Rate limit exceeded")
                        .into_response_with(StatusCode::TOO_MANY_REQUESTS)
                }),
            )
            .route(
                "/upstream",
                get(|| async {
                    Response::builder()
                        .status(StatusCode::NOT_FOUND)
                        .header(CONTENT_TYPE, "application/json")
                        .body(Body::from(r#"{"error":"no such symbol"}"#))
                        .unwrap()
                }),
            )
            .layer(middleware::from_fn(request_id_middleware))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_propagates_incoming_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/rejected")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
        let json = body_json(response).await;
        assert_eq!(json["requestId"], "req-42");
        assert_eq!(json["error"], "rate_limited");
    }

    #[tokio::test]
    async fn test_generates_id_when_absent_or_oversized() {
        let oversized = "x".repeat(MAX_REQUEST_ID_LEN + 1);
        for header in [None, Some(oversized.as_str())] {
            let mut builder = Request::builder().uri("/rejected");
            if let Some(value) = header {
                builder = builder.header(REQUEST_ID_HEADER, value);
            }
            let response = app()
                .oneshot(builder.body(Body::empty()).unwrap())
                .await
                .unwrap();
            let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
            assert!(Uuid::parse_str(id).is_ok());
        }
    }

    #[tokio::test]
    async fn test_upstream_body_untouched() {
        let response = app()
            .oneshot(Request::builder().uri("/upstream").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let json = body_json(response).await;
        assert!(json.get("requestId").is_none());
        assert_eq!(json["error"], "no such symbol");
    }
}
