use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    alert_sink::NotificationSink,
    clock::Clock,
    db::{AccountRepo, BillingAlertRepo, DbError, UsageRepo, fold_totals},
    models::{BillingAlert, NewBillingAlert, OperationKind, UsageLedgerEntry},
    observability::metrics,
    pricing::PriceTable,
};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] DbError),
}

/// A cost just incurred by an account.
#[derive(Debug, Clone, PartialEq)]
pub struct Charge {
    pub account_id: Uuid,
    pub kind: OperationKind,
    pub quantity: u64,
    pub cost: Decimal,
    /// Ledger row the charge was written as, if it is already in the ledger.
    pub entry_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl From<&UsageLedgerEntry> for Charge {
    fn from(entry: &UsageLedgerEntry) -> Self {
        Self {
            account_id: entry.account_id,
            kind: entry.kind,
            quantity: entry.quantity,
            cost: entry.cost,
            entry_id: Some(entry.id),
            at: entry.recorded_at,
        }
    }
}

/// Raises one billing alert per account per cycle once discounted cycle spend
/// reaches the threshold.
pub struct BillingMonitor {
    accounts: Arc<dyn AccountRepo>,
    usage: Arc<dyn UsageRepo>,
    alerts: Arc<dyn BillingAlertRepo>,
    prices: Arc<PriceTable>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    threshold: i64,
}

impl BillingMonitor {
    pub fn new(
        accounts: Arc<dyn AccountRepo>,
        usage: Arc<dyn UsageRepo>,
        alerts: Arc<dyn BillingAlertRepo>,
        prices: Arc<PriceTable>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        threshold: i64,
    ) -> Self {
        Self {
            accounts,
            usage,
            alerts,
            prices,
            sink,
            clock,
            threshold,
        }
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Add `charge` to the account's cycle-to-date spend and create an alert
    /// if the total reaches the threshold for the first time this cycle.
    ///
    /// Returns the new alert, or `None` when below the threshold or already
    /// alerted. Notification failures are logged, not returned.
    pub async fn record_and_check(
        &self,
        charge: Charge,
    ) -> Result<Option<BillingAlert>, MonitorError> {
        let account = self
            .accounts
            .get(charge.account_id)
            .await?
            .ok_or(MonitorError::AccountNotFound(charge.account_id))?;
        let cycle = account.cycle_at(charge.at);

        if self
            .alerts
            .find_in_cycle(charge.account_id, cycle.start)
            .await?
            .is_some()
        {
            metrics::record_billing_check("already_alerted");
            return Ok(None);
        }

        let totals = self
            .usage
            .cycle_totals(charge.account_id, cycle, charge.entry_id)
            .await?;
        let merged = fold_totals(
            totals
                .into_iter()
                .map(|t| (t.kind, t.quantity, t.cost))
                .chain(std::iter::once((charge.kind, charge.quantity, charge.cost))),
        );
        let accumulated = self.prices.to_minor_units(self.prices.aggregate(&merged).net);

        if accumulated < self.threshold {
            metrics::record_billing_check("below");
            return Ok(None);
        }

        let created = self
            .alerts
            .create(NewBillingAlert {
                account_id: charge.account_id,
                accumulated_cost: accumulated,
                threshold: self.threshold,
                cycle_start: cycle.start,
                created_at: self.clock.now(),
            })
            .await;

        let alert = match created {
            Ok(alert) => alert,
            // Another worker alerted this cycle first
            Err(DbError::Conflict(_)) => {
                metrics::record_billing_check("already_alerted");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        metrics::record_billing_check("alerted");
        tracing::info!(
            alert_id = %alert.id,
            account_id = %alert.account_id,
            accumulated_cost = alert.accumulated_cost,
            threshold = alert.threshold,
            "Billing threshold crossed"
        );

        if let Err(e) = self.sink.notify(&alert).await {
            tracing::error!(
                alert_id = %alert.id,
                sink = self.sink.name(),
                error = %e,
                "Failed to deliver billing alert"
            );
        }

        Ok(Some(alert))
    }

    /// [`record_and_check`](Self::record_and_check) with errors logged and dropped.
    pub async fn record_and_check_logged(&self, charge: Charge) -> Option<BillingAlert> {
        let account_id = charge.account_id;
        match self.record_and_check(charge).await {
            Ok(alert) => alert,
            Err(e) => {
                metrics::record_billing_check("error");
                tracing::warn!(%account_id, error = %e, "Billing threshold check failed");
                None
            }
        }
    }
}
