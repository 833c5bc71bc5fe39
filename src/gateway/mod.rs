//! Per-request admission pipeline.
//!
//! ```text
//! RECEIVED -> AUTHENTICATED -> RATE_OK -> BALANCE_OK -> DISPATCHED -> METERED -> DONE
//!     \____________\_______________\____________\
//!                                                 REJECTED(kind)
//! ```
//!
//! Each check runs in order and the first failure ends the request. Nothing
//! is written (key use, ledger) for a rejected request. Usage is committed
//! only after the handler succeeds, on a tracked task so a caller that
//! disconnects mid-flight is still billed for what it was served.

mod downstream;
mod hooks;
mod metering;
mod rejection;

use std::{future::Future, sync::Arc, time::Instant};

use axum::{http::HeaderMap, response::Response};
pub use downstream::{Downstream, DownstreamError, EchoHandler, UpstreamProxy};
pub use hooks::{DispatchOutcome, HookContext, PipelineHook, SpendLogHook};
pub use metering::{RequestInfo, usage_metadata};
pub use rejection::Rejection;
use tokio_util::task::TaskTracker;

use crate::{
    auth::{Identity, extract_credential},
    billing_queue::BillingQueue,
    config::UpstreamConfig,
    events::{EventBus, ServerEvent},
    middleware::add_rate_limit_headers,
    models::{Operation, UsageLedgerEntry, UsageMetadata},
    observability::metrics,
    services::{Charge, RateLimitKey, RateLimitResult, Reservation, Services, UsageRequest},
};

/// Furthest point a request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Authenticated,
    RateOk,
    BalanceOk,
    /// Handler ran but nothing was metered (handler failure or ledger fault).
    Dispatched,
    Metered,
    Done,
    /// Stopped before dispatch, with the rejection kind.
    Rejected(&'static str),
}

/// Result of running one request through the pipeline.
#[derive(Debug)]
pub struct GatewayOutcome {
    pub response: Response,
    pub state: RequestState,
    pub rate_limit: Option<RateLimitResult>,
    pub committed: Option<UsageLedgerEntry>,
}

pub struct Gateway {
    services: Services,
    routes: UpstreamConfig,
    queue: Arc<BillingQueue>,
    events: Arc<EventBus>,
    tasks: TaskTracker,
    hooks: Arc<Vec<Arc<dyn PipelineHook>>>,
}

impl Gateway {
    pub fn new(
        services: Services,
        routes: UpstreamConfig,
        queue: Arc<BillingQueue>,
        events: Arc<EventBus>,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            services,
            routes,
            queue,
            events,
            tasks,
            hooks: Arc::new(Vec::new()),
        }
    }

    /// Register a hook. Hooks run in registration order.
    pub fn with_hook(mut self, hook: Arc<dyn PipelineHook>) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Run a request through authentication, rate limiting and the balance
    /// check, then `dispatch` it and meter the result.
    ///
    /// The returned response always carries rate-limit headers.
    pub async fn process<F, Fut>(
        &self,
        headers: &HeaderMap,
        request: RequestInfo,
        dispatch: F,
    ) -> GatewayOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response, DownstreamError>>,
    {
        let started = Instant::now();

        // RECEIVED -> AUTHENTICATED
        let identity = match self.authenticate_request(headers, &request).await {
            Ok(identity) => identity,
            Err(outcome) => return outcome,
        };

        // AUTHENTICATED -> RATE_OK
        let rate_limit = self
            .services
            .rate_limiter
            .check(
                &RateLimitKey::Credential(identity.api_key_id),
                Some(identity.tier()),
            )
            .await;
        if !rate_limit.allowed {
            self.events.publish(ServerEvent::RateLimitExceeded {
                timestamp: self.services.clock.now(),
                api_key_id: Some(identity.api_key_id),
                limit: rate_limit.limit.unwrap_or_default(),
                window_secs: rate_limit.retry_after_secs,
            });
            return reject(
                Rejection::RateLimited {
                    retry_after_secs: rate_limit.retry_after_secs,
                },
                rate_limit,
            );
        }

        // RATE_OK -> BALANCE_OK
        let route = self.routes.route_for(request.path());
        let operation = route.operation();
        let check = match self
            .services
            .balance
            .check_balance(identity.account_id, operation, route.quantity)
            .await
        {
            Ok(check) => check,
            Err(e) => {
                tracing::warn!(
                    account_id = %identity.account_id,
                    error = %e,
                    "Balance could not be verified, rejecting request"
                );
                return reject(Rejection::BalanceUnverified, rate_limit);
            }
        };
        // Units held by concurrent requests count against the allowance
        let reservation = if check.allowed {
            self.services
                .balance
                .reserve(identity.account_id, operation, route.quantity, check)
        } else {
            Err(check)
        };
        let reservation = match reservation {
            Ok(reservation) => reservation,
            Err(check) => {
                tracing::debug!(
                    account_id = %identity.account_id,
                    kind = %operation.kind,
                    unit_cost = %check.unit_cost,
                    "Insufficient balance"
                );
                return reject(
                    Rejection::InsufficientBalance {
                        available: check.available_balance.amount().unwrap_or_default(),
                        unit_cost: check.unit_cost,
                    },
                    rate_limit,
                );
            }
        };
        metrics::record_admission_duration(started.elapsed().as_secs_f64());

        self.services.authenticator.record_use(&identity).await;
        {
            let ctx = self.hook_context(&identity, operation, route.quantity, &request);
            for hook in self.hooks.iter() {
                hook.before_dispatch(&ctx).await;
            }
        }

        // BALANCE_OK -> DISPATCHED
        let (mut response, state, committed) = match dispatch().await {
            Err(e) => {
                tracing::warn!(
                    path = %request.path(),
                    error = %e,
                    "Downstream handler failed"
                );
                let rejection = Rejection::Downstream(e.to_string());
                let status = rejection.status().as_u16();
                run_after_hooks(
                    &self.hooks,
                    &self.hook_context(&identity, operation, route.quantity, &request),
                    &DispatchOutcome::Failed { status },
                )
                .await;
                (rejection.into_response(), RequestState::Dispatched, None)
            }
            Ok(response) if !response.status().is_success() => {
                let status = response.status().as_u16();
                tracing::debug!(status, path = %request.path(), "Handler failed, not metering");
                run_after_hooks(
                    &self.hooks,
                    &self.hook_context(&identity, operation, route.quantity, &request),
                    &DispatchOutcome::Failed { status },
                )
                .await;
                (response, RequestState::Dispatched, None)
            }
            Ok(response) => {
                // DISPATCHED -> METERED -> DONE
                let commit = Commit {
                    services: self.services.clone(),
                    queue: Arc::clone(&self.queue),
                    events: Arc::clone(&self.events),
                    hooks: Arc::clone(&self.hooks),
                    metadata: usage_metadata(&route, &request, &response),
                    identity,
                    request,
                    operation,
                    quantity: route.quantity,
                    reservation,
                };
                // Spawned so the commit outlives a dropped caller
                let committed = match self.tasks.spawn(commit.run()).await {
                    Ok(committed) => committed,
                    Err(e) => {
                        tracing::error!(error = %e, "Usage commit task failed");
                        None
                    }
                };
                let state = if committed.is_some() {
                    RequestState::Done
                } else {
                    RequestState::Dispatched
                };
                (response, state, committed)
            }
        };

        add_rate_limit_headers(&mut response, &rate_limit, false);
        GatewayOutcome {
            response,
            state,
            rate_limit: Some(rate_limit),
            committed,
        }
    }

    /// Stop accepting commit tasks and wait for those in flight.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Resolve the caller's identity. A failure comes back as the finished
    /// rejection, already counted against the caller's address.
    pub async fn authenticate_request(
        &self,
        headers: &HeaderMap,
        request: &RequestInfo,
    ) -> Result<Identity, GatewayOutcome> {
        match self.authenticate(headers).await {
            Ok(identity) => Ok(identity),
            Err(rejection) => Err(self.reject_unauthenticated(rejection, request).await),
        }
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, Rejection> {
        let authenticator = &self.services.authenticator;
        let credential = extract_credential(headers, authenticator.config())?;
        Ok(authenticator.verify(Some(&credential)).await?)
    }

    /// Failed authentication is counted against the caller's address so key
    /// guessing is throttled too.
    async fn reject_unauthenticated(
        &self,
        rejection: Rejection,
        request: &RequestInfo,
    ) -> GatewayOutcome {
        let key = RateLimitKey::derive(None, request.client_addr.as_deref());
        let rate_limit = self.services.rate_limiter.check(&key, None).await;
        if !rate_limit.allowed {
            self.events.publish(ServerEvent::RateLimitExceeded {
                timestamp: self.services.clock.now(),
                api_key_id: None,
                limit: rate_limit.limit.unwrap_or_default(),
                window_secs: rate_limit.retry_after_secs,
            });
            return reject(
                Rejection::RateLimited {
                    retry_after_secs: rate_limit.retry_after_secs,
                },
                rate_limit,
            );
        }
        reject(rejection, rate_limit)
    }

    fn hook_context<'a>(
        &'a self,
        identity: &'a Identity,
        operation: Operation,
        quantity: u64,
        request: &'a RequestInfo,
    ) -> HookContext<'a> {
        HookContext {
            identity,
            operation,
            quantity,
            request,
            ledger: &self.services.ledger,
        }
    }
}

fn reject(rejection: Rejection, rate_limit: RateLimitResult) -> GatewayOutcome {
    let kind = rejection.kind();
    let mut response = rejection.into_response();
    add_rate_limit_headers(&mut response, &rate_limit, true);
    GatewayOutcome {
        response,
        state: RequestState::Rejected(kind),
        rate_limit: Some(rate_limit),
        committed: None,
    }
}

async fn run_after_hooks(
    hooks: &[Arc<dyn PipelineHook>],
    ctx: &HookContext<'_>,
    outcome: &DispatchOutcome<'_>,
) {
    for hook in hooks {
        hook.after_dispatch(ctx, outcome).await;
    }
}

/// Everything needed to meter a served request, owned so it can run detached.
struct Commit {
    services: Services,
    queue: Arc<BillingQueue>,
    events: Arc<EventBus>,
    hooks: Arc<Vec<Arc<dyn PipelineHook>>>,
    identity: Identity,
    request: RequestInfo,
    operation: Operation,
    quantity: u64,
    metadata: UsageMetadata,
    /// Released once the counter has been drawn.
    reservation: Option<Reservation>,
}

impl Commit {
    async fn run(self) -> Option<UsageLedgerEntry> {
        let result = self
            .services
            .balance
            .commit_usage(
                &self.identity.plan,
                UsageRequest {
                    account_id: self.identity.account_id,
                    api_key_id: Some(self.identity.api_key_id),
                    operation: self.operation,
                    quantity: self.quantity,
                    metadata: self.metadata.clone(),
                    origin: self.request.client_addr.clone(),
                },
            )
            .await;
        drop(self.reservation);

        let ctx = HookContext {
            identity: &self.identity,
            operation: self.operation,
            quantity: self.quantity,
            request: &self.request,
            ledger: &self.services.ledger,
        };

        match result {
            Ok(entry) => {
                self.events.publish(ServerEvent::UsageCommitted {
                    entry_id: entry.id,
                    account_id: entry.account_id,
                    api_key_id: entry.api_key_id,
                    timestamp: entry.recorded_at,
                    kind: entry.kind.to_string(),
                    quantity: entry.quantity,
                    cost: entry.cost,
                });
                self.queue.push(Charge::from(&entry));
                run_after_hooks(&self.hooks, &ctx, &DispatchOutcome::Metered(&entry)).await;
                Some(entry)
            }
            Err(e) => {
                tracing::error!(
                    account_id = %self.identity.account_id,
                    api_key_id = %self.identity.api_key_id,
                    error = %e,
                    "Handler succeeded but usage was not committed"
                );
                run_after_hooks(&self.hooks, &ctx, &DispatchOutcome::Unmetered).await;
                None
            }
        }
    }
}
