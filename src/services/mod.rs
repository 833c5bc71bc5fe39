mod balance;
mod billing_monitor;
pub mod bootstrap;
mod ledger;
mod rate_limiter;

use std::sync::Arc;

pub use balance::{
    Balance, BalanceCheck, BalanceEnforcer, BalanceError, Reservation, UsageRequest,
};
pub use billing_monitor::{BillingMonitor, Charge, MonitorError};
pub use ledger::{CycleSummary, LedgerView};
pub use rate_limiter::{RateLimitKey, RateLimitResult, RateLimiter};

use crate::{
    alert_sink::NotificationSink,
    auth::KeyAuthenticator,
    cache::WindowStore,
    clock::Clock,
    config::GatewayConfig,
    db::DbPool,
    pricing::PriceTable,
};

/// Container for the gateway's decision services.
///
/// Built once at startup; every collaborator (store, clock, sink) is injected.
#[derive(Clone)]
pub struct Services {
    pub authenticator: Arc<KeyAuthenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub balance: Arc<BalanceEnforcer>,
    pub billing_monitor: Arc<BillingMonitor>,
    pub ledger: LedgerView,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    pub fn new(
        db: &DbPool,
        windows: Arc<dyn WindowStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: &GatewayConfig,
    ) -> Self {
        let prices = Arc::new(PriceTable::new(config.pricing.clone()));

        Self {
            authenticator: Arc::new(KeyAuthenticator::new(
                db.api_keys(),
                clock.clone(),
                config.auth.clone(),
            )),
            rate_limiter: Arc::new(RateLimiter::new(
                windows,
                clock.clone(),
                config.limits.clone(),
            )),
            balance: Arc::new(BalanceEnforcer::new(
                db.accounts(),
                db.usage(),
                prices.clone(),
                clock.clone(),
            )),
            billing_monitor: Arc::new(BillingMonitor::new(
                db.accounts(),
                db.usage(),
                db.billing_alerts(),
                prices.clone(),
                sink,
                clock.clone(),
                config.billing.threshold_minor_units,
            )),
            ledger: LedgerView::new(db.accounts(), db.usage(), prices, clock.clone()),
            clock,
        }
    }
}
