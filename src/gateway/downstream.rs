//! The protected service behind the gateway.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, header},
    response::{IntoResponse, Response},
};

use crate::config::{AuthConfig, UpstreamConfig};

#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to build upstream response: {0}")]
    Response(#[from] http::Error),

    #[error("Invalid upstream configuration: {0}")]
    Config(String),
}

/// Serves a request once the gateway has admitted it.
///
/// A non-success status is a handler failure: it reaches the caller as-is
/// and nothing is metered.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, request: Request) -> Result<Response, DownstreamError>;

    fn name(&self) -> &'static str;
}

/// Built-in handler used when no upstream is configured. Echoes the request line.
pub struct EchoHandler;

#[async_trait]
impl Downstream for EchoHandler {
    async fn call(&self, request: Request) -> Result<Response, DownstreamError> {
        Ok(Json(serde_json::json!({
            "method": request.method().as_str(),
            "path": request.uri().path(),
            "query": request.uri().query(),
        }))
        .into_response())
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

/// Forwards requests to `upstream.base_url` and streams the response back.
///
/// Gateway credentials are stripped before forwarding.
pub struct UpstreamProxy {
    client: reqwest::Client,
    base_url: String,
    credential_header: HeaderName,
}

impl UpstreamProxy {
    pub fn new(
        base_url: &str,
        upstream: &UpstreamConfig,
        auth: &AuthConfig,
    ) -> Result<Self, DownstreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(upstream.timeout_secs))
            .build()?;
        let credential_header = HeaderName::from_bytes(auth.header_name.as_bytes())
            .map_err(|e| DownstreamError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential_header,
        })
    }

    fn forward_headers(&self, headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = filter_hop_by_hop(headers);
        forwarded.remove(&self.credential_header);
        forwarded.remove(header::AUTHORIZATION);
        forwarded
    }
}

/// Drop headers that describe a single connection.
fn filter_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in [
        header::CONNECTION,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
        header::HOST,
    ] {
        filtered.remove(name);
    }
    filtered
}

#[async_trait]
impl Downstream for UpstreamProxy {
    async fn call(&self, request: Request) -> Result<Response, DownstreamError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(self.forward_headers(&parts.headers))
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await?;

        let mut builder = Response::builder().status(upstream.status());
        if let Some(headers) = builder.headers_mut() {
            *headers = filter_hop_by_hop(upstream.headers());
        }
        Ok(builder.body(Body::from_stream(upstream.bytes_stream()))?)
    }

    fn name(&self) -> &'static str {
        "upstream"
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header_exists, method, path, query_param},
    };

    use super::*;

    fn proxy(server: &MockServer) -> UpstreamProxy {
        UpstreamProxy::new(
            &server.uri(),
            &UpstreamConfig::default(),
            &AuthConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_forwards_path_query_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/predictions/AAPL"))
            .and(query_param("horizon", "5d"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"price\":1}"))
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::builder()
            .method("POST")
            .uri("/v1/predictions/AAPL?horizon=5d")
            .body(Body::from("{}"))
            .unwrap();
        let response = proxy(&server).call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"{\"price\":1}");
    }

    #[tokio::test]
    async fn test_strips_gateway_credentials() {
        let server = MockServer::start().await;
        Mock::given(header_exists("x-api-key"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let request = Request::builder()
            .uri("/v1/quotes")
            .header("X-API-Key", "tg_secret")
            .header("Authorization", "Bearer tg_secret")
            .body(Body::empty())
            .unwrap();
        let response = proxy(&server).call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_error_status_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let request = Request::builder()
            .uri("/v1/missing")
            .body(Body::empty())
            .unwrap();
        let response = proxy(&server).call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_error() {
        let config = UpstreamConfig {
            timeout_secs: 1,
            ..UpstreamConfig::default()
        };
        let proxy =
            UpstreamProxy::new("http://127.0.0.1:1", &config, &AuthConfig::default()).unwrap();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert!(matches!(
            proxy.call(request).await,
            Err(DownstreamError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_echo_handler() {
        let request = Request::builder()
            .method("DELETE")
            .uri("/v1/alerts/7?force=true")
            .body(Body::empty())
            .unwrap();
        let response = EchoHandler.call(request).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["method"], "DELETE");
        assert_eq!(json["path"], "/v1/alerts/7");
        assert_eq!(json["query"], "force=true");
    }
}
