//! Application wiring: shared state and the HTTP router.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::StatusCode,
    routing::{any, get},
};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    alert_sink::{CompositeSink, EventBusSink, LogSink, NotificationSink, SinkError, WebhookSink},
    billing_queue::BillingQueue,
    cache::{self, CacheError, WindowStore},
    clock::{Clock, SystemClock},
    config::GatewayConfig,
    db::{DbError, DbPool},
    events::EventBus,
    gateway::{Downstream, DownstreamError, EchoHandler, Gateway, SpendLogHook, UpstreamProxy},
    middleware, routes,
    services::{Services, bootstrap},
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),

    #[error("Window store initialization failed: {0}")]
    Cache(#[from] CacheError),

    #[error("Notification sink setup failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Upstream setup failed: {0}")]
    Downstream(#[from] DownstreamError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub db: Arc<DbPool>,
    /// Rate window storage, kept for health checks and the sweep job.
    pub windows: Arc<dyn WindowStore>,
    pub services: Services,
    pub gateway: Arc<Gateway>,
    /// The protected service behind `/v1`.
    pub downstream: Arc<dyn Downstream>,
    pub event_bus: Arc<EventBus>,
    pub billing_queue: Arc<BillingQueue>,
    /// Tracks usage commits so shutdown can wait for them.
    pub task_tracker: TaskTracker,
}

impl AppState {
    /// Open the configured stores, seed bootstrap accounts and build every
    /// service against the wall clock.
    pub async fn new(config: GatewayConfig) -> Result<Self, StartupError> {
        let db = DbPool::from_config(&config.database).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let report = bootstrap::seed(&db, &config.bootstrap, clock.now()).await?;
        if report.accounts_created > 0 || report.keys_created > 0 {
            tracing::info!(
                accounts = report.accounts_created,
                keys = report.keys_created,
                "Seeded bootstrap accounts"
            );
        }

        let windows = cache::from_config(&config.cache).await?;
        let event_bus = Arc::new(EventBus::new());
        let sink = build_sink(&config, &event_bus)?;

        let downstream: Arc<dyn Downstream> = match &config.upstream.base_url {
            Some(base_url) => {
                tracing::info!(base_url = %base_url, "Forwarding admitted requests upstream");
                Arc::new(UpstreamProxy::new(base_url, &config.upstream, &config.auth)?)
            }
            None => {
                tracing::warn!("No upstream.base_url configured, admitted requests are echoed");
                Arc::new(EchoHandler)
            }
        };

        Ok(Self::from_parts(
            config, db, windows, clock, sink, event_bus, downstream,
        ))
    }

    /// Assemble state from already-built collaborators.
    pub fn from_parts(
        config: GatewayConfig,
        db: DbPool,
        windows: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        event_bus: Arc<EventBus>,
        downstream: Arc<dyn Downstream>,
    ) -> Self {
        let services = Services::new(&db, windows.clone(), sink, clock, &config);
        let billing_queue = Arc::new(BillingQueue::new(&config.billing.queue));
        let task_tracker = TaskTracker::new();
        let gateway = Gateway::new(
            services.clone(),
            config.upstream.clone(),
            billing_queue.clone(),
            event_bus.clone(),
            task_tracker.clone(),
        )
        .with_hook(Arc::new(SpendLogHook));

        Self {
            config: Arc::new(config),
            db: Arc::new(db),
            windows,
            services,
            gateway: Arc::new(gateway),
            downstream,
            event_bus,
            billing_queue,
            task_tracker,
        }
    }
}

impl AppState {
    /// Finish background work once the server has stopped serving.
    ///
    /// Commits are awaited before the billing queue is told to drain, since
    /// each commit pushes its charge onto that queue.
    pub async fn drain(&self, billing_worker: JoinHandle<()>, timeout: Duration) {
        self.task_tracker.close();
        match tokio::time::timeout(timeout, self.task_tracker.wait()).await {
            Ok(()) => tracing::info!("All usage commits completed"),
            Err(_) => tracing::warn!("Timeout waiting for usage commits, some may not have completed"),
        }

        self.billing_queue.shutdown();
        match tokio::time::timeout(timeout, billing_worker).await {
            Ok(_) => tracing::info!("Billing queue drained"),
            Err(_) => tracing::warn!("Timeout waiting for billing queue to drain"),
        }
    }
}

/// Event bus and log sinks always; the webhook when configured.
fn build_sink(
    config: &GatewayConfig,
    event_bus: &Arc<EventBus>,
) -> Result<Arc<dyn NotificationSink>, SinkError> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![
        Arc::new(EventBusSink::new(event_bus.clone())),
        Arc::new(LogSink),
    ];
    if let Some(webhook) = &config.billing.webhook {
        sinks.push(Arc::new(WebhookSink::from_config(webhook)?));
        tracing::info!("Billing alerts delivered to webhook");
    }
    Ok(Arc::new(CompositeSink::new(sinks)))
}

pub fn build_app(config: &GatewayConfig, state: AppState) -> Router {
    // Metered routes only; health and metrics stay outside the pipeline
    let metered = Router::new()
        .route("/v1", any(routes::forward))
        .route("/v1/{*path}", any(routes::forward))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::gateway_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness))
        .route(&config.observability.metrics.path, get(routes::health::metrics))
        .route("/account/usage", get(routes::account::usage))
        .merge(metered)
        .layer(axum::middleware::from_fn(middleware::request_id_middleware));

    if let Some(cors_layer) = config.server.cors.clone().into_layer() {
        app = app.layer(cors_layer);
    }

    app.layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(config.server.timeout_secs),
        ))
        .with_state(state)
}
