use axum::{
    extract::{Request, State},
    response::Response,
};

use crate::{AppState, gateway::Rejection};

/// Hand an admitted request to the protected service.
///
/// Runs behind the gateway middleware, which decides from the status whether
/// the request is metered.
pub async fn forward(State(state): State<AppState>, req: Request) -> Response {
    let downstream = state.downstream.name();
    match state.downstream.call(req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(downstream, error = %e, "Downstream call failed");
            Rejection::Downstream(e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use axum::{
        body::Body,
        extract::Request,
        http::{Method, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::{
        app::testing::{issue_key, state, state_with_downstream},
        build_app,
        config::GatewayConfig,
        db::DbPool,
        gateway::{Downstream, DownstreamError},
        models::PlanTier,
    };

    /// Upstream that never answers within a test's patience.
    struct StalledUpstream;

    #[async_trait]
    impl Downstream for StalledUpstream {
        async fn call(&self, _request: Request) -> Result<Response, DownstreamError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Response::new(Body::empty()))
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_stalled_upstream_times_out_unmetered() {
        let db = DbPool::in_memory();
        let (raw, account_id) = issue_key(&db, PlanTier::Basic).await;
        let mut config = GatewayConfig::default();
        config.server.timeout_secs = 1;
        let app_state = state_with_downstream(config.clone(), db, Arc::new(StalledUpstream));
        let app = build_app(&config, app_state.clone());

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/v1/quotes")
                    .header("X-API-Key", raw)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let entries = app_state.db.usage().list_recent(account_id, 10).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_admitted_request_reaches_upstream_with_headers() {
        let db = DbPool::in_memory();
        let (raw, account_id) = issue_key(&db, PlanTier::Free).await;
        let config = GatewayConfig::default();
        let app_state = state(config.clone(), db);
        let app = build_app(&config, app_state.clone());

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::POST)
                    .uri("/v1/quotes?symbol=AAPL")
                    .header("Authorization", format!("Bearer {raw}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["X-RateLimit-Limit"], "60");
        assert_eq!(response.headers()["X-RateLimit-Remaining"], "59");
        assert!(response.headers().contains_key("X-Request-Id"));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["path"], "/v1/quotes");

        let entries = app_state.db.usage().list_recent(account_id, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_flushes_charges_of_served_requests() {
        let db = DbPool::in_memory();
        let (raw, account_id) = issue_key(&db, PlanTier::Basic).await;
        let mut config = GatewayConfig::default();
        config.billing.threshold_minor_units = 1;
        config.billing.queue.flush_interval_ms = 10;
        let app_state = state(config.clone(), db);
        let worker = app_state
            .billing_queue
            .start_worker(app_state.services.billing_monitor.clone());
        let app = build_app(&config, app_state.clone());

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/v1/quotes")
                    .header("X-API-Key", raw)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        app_state.drain(worker, Duration::from_secs(5)).await;

        assert!(app_state.billing_queue.is_empty());
        let alerts = app_state
            .db
            .billing_alerts()
            .list_by_account(account_id)
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_unauthenticated_request_is_rejected_with_request_id() {
        let config = GatewayConfig::default();
        let app = build_app(&config, state(config.clone(), DbPool::in_memory()));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/v1/quotes")
                    .header("X-Request-Id", "req-7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("Retry-After"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "missing_credential");
        assert_eq!(json["requestId"], "req-7");
    }
}
