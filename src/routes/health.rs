//! Health check endpoints for probes and monitoring.

use std::time::Instant;

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy", "degraded" or "unhealthy"
    pub status: &'static str,
    pub version: &'static str,
    pub subsystems: SubsystemStatus,
}

#[derive(Debug, Serialize)]
pub struct SubsystemStatus {
    pub database: ComponentStatus,
    pub window_store: ComponentStatus,
    pub billing_queue: QueueStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub dropped: u64,
}

/// Full health check with subsystem status.
///
/// The account store is critical: requests cannot be admitted without it.
/// A failing window store only degrades the service, since rate counting
/// fails open.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let db_result = state.db.ping().await;
    let database = ComponentStatus {
        healthy: db_result.is_ok(),
        backend: state.db.backend_name(),
        message: db_result.err().map(|e| e.to_string()),
        latency_ms: start.elapsed().as_millis() as u64,
    };

    let start = Instant::now();
    let window_result = state
        .windows
        .count("__health_check__", state.services.clock.now_millis(), 1)
        .await;
    let window_store = ComponentStatus {
        healthy: window_result.is_ok(),
        backend: state.config.cache.backend_name(),
        message: window_result.err().map(|e| e.to_string()),
        latency_ms: start.elapsed().as_millis() as u64,
    };

    let (status, code) = match (database.healthy, window_store.healthy) {
        (true, true) => ("healthy", StatusCode::OK),
        (true, false) => ("degraded", StatusCode::OK),
        (false, _) => ("unhealthy", StatusCode::SERVICE_UNAVAILABLE),
    };

    let health = HealthStatus {
        status,
        version: env!("CARGO_PKG_VERSION"),
        subsystems: SubsystemStatus {
            database,
            window_store,
            billing_queue: QueueStatus {
                pending: state.billing_queue.len(),
                dropped: state.billing_queue.dropped_count(),
            },
        },
    };

    (code, Json(health))
}

/// Liveness probe. Succeeds while the process can serve requests at all.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe. Ready once the account store answers.
#[tracing::instrument(name = "health.readiness", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Prometheus metrics in text exposition format.
#[tracing::instrument(name = "health.metrics")]
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        return match get_prometheus_handle() {
            Some(handle) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            ),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        };
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
