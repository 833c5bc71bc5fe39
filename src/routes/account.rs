//! Self-service view of the caller's own usage.

use axum::{
    Json,
    extract::{Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    error::ErrorResponse,
    gateway::RequestInfo,
    middleware::extract_client_ip,
    models::{Operation, OperationKind, PlanTier, PriceClass, UsageLedgerEntry},
    services::{Balance, CycleSummary},
};

const DEFAULT_RECENT: usize = 20;
const MAX_RECENT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Recent ledger entries to include
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUsage {
    pub account_id: uuid::Uuid,
    pub tier: PlanTier,
    pub summary: CycleSummary,
    /// Remaining spend per operation kind, at basic price class
    pub balances: Vec<KindBalance>,
    pub recent: Vec<UsageLedgerEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindBalance {
    pub kind: OperationKind,
    pub available_balance: Balance,
}

/// `GET /account/usage`: cycle-to-date spend, remaining balances and the most
/// recent ledger entries for the account owning the presented key.
///
/// Reading usage is not metered and does not count against the key's rate
/// window. Failed authentication counts against the caller's address, as on
/// metered routes.
#[tracing::instrument(name = "account.usage", skip_all)]
pub async fn usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
    req: Request,
) -> Response {
    let client_addr =
        extract_client_ip(&req, &state.config.server.trusted_proxies).map(|ip| ip.to_string());
    let info = RequestInfo::new(req.method().clone(), req.uri().clone(), client_addr);
    let identity = match state.gateway.authenticate_request(req.headers(), &info).await {
        Ok(identity) => identity,
        Err(outcome) => return outcome.response,
    };

    let ledger = &state.services.ledger;
    let limit = query.limit.unwrap_or(DEFAULT_RECENT).min(MAX_RECENT);
    let result = async {
        let plan = state
            .db
            .accounts()
            .get(identity.account_id)
            .await?
            .unwrap_or(identity.plan);
        let summary = ledger.summarize(&plan).await?;
        let recent = ledger.recent(plan.id, limit).await?;
        let balances = OperationKind::all()
            .iter()
            .map(|&kind| KindBalance {
                kind,
                available_balance: state
                    .services
                    .balance
                    .evaluate(&plan, Operation::new(kind, PriceClass::Basic), 1)
                    .available_balance,
            })
            .collect();
        Ok::<_, crate::db::DbError>(AccountUsage {
            account_id: plan.id,
            tier: plan.tier,
            summary,
            balances,
            recent,
        })
    }
    .await;

    match result {
        Ok(usage) => Json(usage).into_response(),
        Err(e) => {
            tracing::error!(account_id = %identity.account_id, error = %e, "Failed to read usage");
            ErrorResponse::new("infrastructure_fault", "Usage is temporarily unavailable")
                .into_response_with(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        app::testing::{issue_key, state},
        build_app,
        config::GatewayConfig,
        db::{DbPool, tests::harness::cycle_start},
        models::{UsageCounter, UsageMetadata},
        services::UsageRequest,
    };

    async fn get(app: axum::Router, uri: &str, key: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = key {
            builder = builder.header("X-API-Key", key);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_usage_reports_cycle_spend() {
        let db = DbPool::in_memory();
        let (raw, account_id) = issue_key(&db, PlanTier::Basic).await;
        db.accounts()
            .increment_consumed(account_id, UsageCounter::Predictions, 40, cycle_start())
            .await
            .unwrap();
        let config = GatewayConfig::default();
        let app_state = state(config.clone(), db);

        let plan = app_state.db.accounts().get(account_id).await.unwrap().unwrap();
        for symbol in ["AAPL", "MSFT"] {
            app_state
                .services
                .balance
                .commit_usage(
                    &plan,
                    UsageRequest {
                        account_id,
                        api_key_id: None,
                        operation: Operation::prediction(PriceClass::Advanced),
                        quantity: 1,
                        metadata: UsageMetadata::Prediction {
                            symbol: symbol.into(),
                        },
                        origin: None,
                    },
                )
                .await
                .unwrap();
        }

        let (status, json) = get(
            build_app(&config, app_state),
            "/account/usage?limit=1",
            Some(&raw),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tier"], "basic");
        assert_eq!(json["summary"]["net_minor_units"], 10);
        assert_eq!(json["recent"].as_array().unwrap().len(), 1);

        let prediction = json["balances"]
            .as_array()
            .unwrap()
            .iter()
            .find(|b| b["kind"] == "prediction")
            .unwrap();
        // 50 allowance, 42 consumed, basic class
        assert_eq!(prediction["availableBalance"], serde_json::json!(0.08));
    }

    #[tokio::test]
    async fn test_usage_requires_credential() {
        let config = GatewayConfig::default();
        let app = build_app(&config, state(config.clone(), DbPool::in_memory()));

        let (status, json) = get(app, "/account/usage", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "missing_credential");
    }

    #[tokio::test]
    async fn test_repeated_bad_keys_are_throttled() {
        let config = GatewayConfig::default();
        let app = build_app(&config, state(config.clone(), DbPool::in_memory()));

        for _ in 0..config.limits.anonymous {
            let (status, json) = get(app.clone(), "/account/usage", Some("tg_live_guess")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(json["error"], "invalid_credential");
        }
        let (status, json) = get(app, "/account/usage", Some("tg_live_guess")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["error"], "rate_limited");
    }
}
