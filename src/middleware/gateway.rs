use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

use super::rate_limit::extract_client_ip;
use crate::{AppState, gateway::RequestInfo, observability::metrics};

/// Runs every metered route through the gateway pipeline.
///
/// The wrapped handler is only reached once the caller is authenticated,
/// within its rate window and able to afford the operation.
pub async fn gateway_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let headers = req.headers().clone();
    let method = req.method().clone();
    let matched = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let client_addr = extract_client_ip(&req, &state.config.server.trusted_proxies)
        .map(|ip| ip.to_string());
    let info = RequestInfo::new(method.clone(), req.uri().clone(), client_addr);

    let outcome = state
        .gateway
        .process(&headers, info, move || async move { Ok(next.run(req).await) })
        .await;

    let status = outcome.response.status().as_u16();
    metrics::record_http_request(
        method.as_str(),
        &matched,
        status,
        started.elapsed().as_secs_f64(),
    );
    tracing::debug!(
        state = ?outcome.state,
        status,
        committed = outcome.committed.is_some(),
        "Gateway request finished"
    );

    outcome.response
}
