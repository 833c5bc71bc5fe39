use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{AccountRepo, DbError, DbResult, UsageRepo},
    models::{AccountPlanState, BillingCycle, UsageLedgerEntry},
    pricing::{CycleCost, PriceTable},
};

/// Cycle-to-date spend of one account, with the bulk discount applied.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub account_id: Uuid,
    pub cycle: BillingCycle,
    pub cost: CycleCost,
    /// `cost.net` in minor currency units
    pub net_minor_units: i64,
}

/// Read-only access to the usage ledger.
///
/// Handed to pipeline hooks and the account usage route. Exposes no write path.
#[derive(Clone)]
pub struct LedgerView {
    accounts: Arc<dyn AccountRepo>,
    usage: Arc<dyn UsageRepo>,
    prices: Arc<PriceTable>,
    clock: Arc<dyn Clock>,
}

impl LedgerView {
    pub fn new(
        accounts: Arc<dyn AccountRepo>,
        usage: Arc<dyn UsageRepo>,
        prices: Arc<PriceTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            usage,
            prices,
            clock,
        }
    }

    pub async fn cycle_summary(&self, account_id: Uuid) -> DbResult<CycleSummary> {
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or(DbError::NotFound)?;
        self.summarize(&account).await
    }

    /// Summary for an account whose plan state is already loaded.
    pub async fn summarize(&self, account: &AccountPlanState) -> DbResult<CycleSummary> {
        let cycle = account.cycle_at(self.clock.now());
        let totals = self.usage.cycle_totals(account.id, cycle, None).await?;
        let cost = self.prices.aggregate(&totals);
        Ok(CycleSummary {
            account_id: account.id,
            cycle,
            net_minor_units: self.prices.to_minor_units(cost.net),
            cost,
        })
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, account_id: Uuid, limit: usize) -> DbResult<Vec<UsageLedgerEntry>> {
        self.usage.list_recent(account_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::{Decimal, dec};

    use super::*;
    use crate::{
        clock::ManualClock,
        db::{
            DbPool,
            tests::harness::{create_account, cycle_start},
        },
        models::{NewUsageEntry, OperationKind, PlanTier, PriceClass, UsageMetadata},
        pricing::PricingConfig,
    };

    fn view(db: &DbPool) -> LedgerView {
        LedgerView::new(
            db.accounts(),
            db.usage(),
            Arc::new(PriceTable::new(PricingConfig::default())),
            Arc::new(ManualClock::new(cycle_start() + Duration::days(5))),
        )
    }

    async fn append_predictions(db: &DbPool, account_id: Uuid, quantity: u64) {
        db.usage()
            .append(NewUsageEntry {
                account_id,
                api_key_id: None,
                price_class: PriceClass::Basic,
                quantity,
                unit_price: dec!(0.01),
                cost: dec!(0.01) * Decimal::from(quantity),
                origin: None,
                metadata: UsageMetadata::Prediction {
                    symbol: "NVDA".into(),
                },
                recorded_at: cycle_start() + Duration::days(1),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_summary_applies_bulk_discount() {
        let db = DbPool::in_memory();
        let account = create_account(&db, "acme", PlanTier::Enterprise).await;
        append_predictions(&db, account.id, 10_000).await;
        append_predictions(&db, account.id, 1).await;

        let summary = view(&db).cycle_summary(account.id).await.unwrap();
        assert_eq!(summary.cycle.start, cycle_start());
        assert_eq!(summary.cost.gross, dec!(100.01));
        assert_eq!(summary.cost.net, dec!(80.008));
        assert_eq!(summary.net_minor_units, 8001);
        assert_eq!(summary.cost.kinds[0].kind, OperationKind::Prediction);
        assert!(summary.cost.kinds[0].discounted);
    }

    #[tokio::test]
    async fn test_recent_and_missing_account() {
        let db = DbPool::in_memory();
        let account = create_account(&db, "acme", PlanTier::Basic).await;
        append_predictions(&db, account.id, 2).await;

        let view = view(&db);
        assert_eq!(view.recent(account.id, 10).await.unwrap().len(), 1);
        assert!(matches!(
            view.cycle_summary(Uuid::new_v4()).await,
            Err(DbError::NotFound)
        ));
    }
}
