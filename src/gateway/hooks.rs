//! Extension points around dispatch.
//!
//! Hooks observe admitted requests. They get a read-only [`LedgerView`] and
//! cannot write usage or change the admission decision.

use async_trait::async_trait;

use crate::{
    auth::Identity,
    models::{Operation, UsageLedgerEntry},
    services::LedgerView,
};

use super::RequestInfo;

/// What a hook sees about the request being served.
pub struct HookContext<'a> {
    pub identity: &'a Identity,
    pub operation: Operation,
    pub quantity: u64,
    pub request: &'a RequestInfo,
    pub ledger: &'a LedgerView,
}

/// How dispatch ended, for post-dispatch hooks.
#[derive(Debug)]
pub enum DispatchOutcome<'a> {
    /// Handler succeeded and usage was written.
    Metered(&'a UsageLedgerEntry),
    /// Handler succeeded but the ledger write failed.
    Unmetered,
    /// Handler failed; nothing was committed.
    Failed { status: u16 },
}

#[async_trait]
pub trait PipelineHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs after every admission check passed, right before dispatch.
    async fn before_dispatch(&self, _ctx: &HookContext<'_>) {}

    /// Runs once dispatch (and metering, on success) has finished.
    async fn after_dispatch(&self, _ctx: &HookContext<'_>, _outcome: &DispatchOutcome<'_>) {}
}

/// Logs each metered request with the account's cycle-to-date spend.
///
/// Aggregating the cycle costs a ledger read per request, so the hook does
/// nothing unless debug logging is enabled.
pub struct SpendLogHook;

#[async_trait]
impl PipelineHook for SpendLogHook {
    fn name(&self) -> &'static str {
        "spend_log"
    }

    async fn after_dispatch(&self, ctx: &HookContext<'_>, outcome: &DispatchOutcome<'_>) {
        let DispatchOutcome::Metered(entry) = outcome else {
            return;
        };
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        match ctx.ledger.summarize(&ctx.identity.plan).await {
            Ok(summary) => tracing::debug!(
                account_id = %ctx.identity.account_id,
                entry_id = %entry.id,
                cycle_net = %summary.cost.net,
                "Cycle spend after request"
            ),
            Err(e) => tracing::debug!(error = %e, "Cycle spend unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::http::Method;
    use chrono::Duration;
    use rust_decimal::dec;
    use uuid::Uuid;

    use super::*;
    use crate::{
        clock::ManualClock,
        db::{
            DbPool, DbResult, UsageRepo,
            tests::harness::{create_account, cycle_start},
        },
        models::{BillingCycle, KindTotal, NewUsageEntry, PlanTier, PriceClass, UsageMetadata},
        pricing::{PriceTable, PricingConfig},
    };

    /// Counts cycle aggregations passing through to the wrapped repo.
    struct CountingUsage {
        inner: Arc<dyn UsageRepo>,
        aggregations: AtomicUsize,
    }

    #[async_trait]
    impl UsageRepo for CountingUsage {
        async fn append(&self, entry: NewUsageEntry) -> DbResult<UsageLedgerEntry> {
            self.inner.append(entry).await
        }

        async fn cycle_totals(
            &self,
            account_id: Uuid,
            cycle: BillingCycle,
            exclude: Option<Uuid>,
        ) -> DbResult<Vec<KindTotal>> {
            self.aggregations.fetch_add(1, Ordering::SeqCst);
            self.inner.cycle_totals(account_id, cycle, exclude).await
        }

        async fn list_recent(
            &self,
            account_id: Uuid,
            limit: usize,
        ) -> DbResult<Vec<UsageLedgerEntry>> {
            self.inner.list_recent(account_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_spend_log_skips_aggregation_without_debug() {
        let db = DbPool::in_memory();
        let account = create_account(&db, "acme", PlanTier::Basic).await;
        let usage = Arc::new(CountingUsage {
            inner: db.usage(),
            aggregations: AtomicUsize::new(0),
        });
        let ledger = LedgerView::new(
            db.accounts(),
            usage.clone(),
            Arc::new(PriceTable::new(PricingConfig::default())),
            Arc::new(ManualClock::new(cycle_start() + Duration::days(1))),
        );
        let entry = usage
            .append(NewUsageEntry {
                account_id: account.id,
                api_key_id: None,
                price_class: PriceClass::Basic,
                quantity: 1,
                unit_price: dec!(0.01),
                cost: dec!(0.01),
                origin: None,
                metadata: UsageMetadata::Prediction {
                    symbol: "AAPL".into(),
                },
                recorded_at: cycle_start() + Duration::hours(1),
            })
            .await
            .unwrap();
        let identity = Identity {
            api_key_id: Uuid::new_v4(),
            account_id: account.id,
            key_prefix: "tg_live_abcd".into(),
            plan: account,
        };
        let request = RequestInfo::new(Method::GET, "/v1/predictions/AAPL".parse().unwrap(), None);
        let ctx = HookContext {
            identity: &identity,
            operation: Operation::prediction(PriceClass::Basic),
            quantity: 1,
            request: &request,
            ledger: &ledger,
        };

        // No subscriber is installed, so debug events are disabled
        for _ in 0..3 {
            SpendLogHook
                .after_dispatch(&ctx, &DispatchOutcome::Metered(&entry))
                .await;
        }
        assert_eq!(usage.aggregations.load(Ordering::SeqCst), 0);
    }
}
