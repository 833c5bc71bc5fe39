use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{BillingCycle, KindTotal, NewUsageEntry, OperationKind, UsageLedgerEntry},
};

/// Append-only usage ledger.
#[async_trait]
pub trait UsageRepo: Send + Sync {
    async fn append(&self, entry: NewUsageEntry) -> DbResult<UsageLedgerEntry>;

    /// Undiscounted per-kind totals for entries recorded within `cycle`.
    ///
    /// `exclude` skips one entry, so a caller holding a freshly appended row
    /// can add its cost explicitly without counting it twice.
    async fn cycle_totals(
        &self,
        account_id: Uuid,
        cycle: BillingCycle,
        exclude: Option<Uuid>,
    ) -> DbResult<Vec<KindTotal>>;

    /// Most recent entries first.
    async fn list_recent(&self, account_id: Uuid, limit: usize) -> DbResult<Vec<UsageLedgerEntry>>;
}

/// Fold `(kind, quantity, cost)` rows into per-kind totals, ordered by kind.
pub fn fold_totals(rows: impl IntoIterator<Item = (OperationKind, u64, Decimal)>) -> Vec<KindTotal> {
    let mut totals: Vec<KindTotal> = Vec::new();
    for (kind, quantity, cost) in rows {
        match totals.iter_mut().find(|t| t.kind == kind) {
            Some(total) => {
                total.quantity = total.quantity.saturating_add(quantity);
                total.cost += cost;
            }
            None => totals.push(KindTotal {
                kind,
                quantity,
                cost,
            }),
        }
    }
    totals.sort_by_key(|t| t.kind);
    totals
}
