use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{AccountRepo, DbError, UsageRepo},
    models::{
        AccountPlanState, NewUsageEntry, Operation, UsageCounter, UsageLedgerEntry, UsageMetadata,
    },
    observability::metrics,
    pricing::PriceTable,
};

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Operation kind {operation} does not match metadata kind {metadata}")]
    MetadataMismatch { operation: String, metadata: String },

    #[error("Quantity must be greater than 0")]
    ZeroQuantity,

    #[error("Account store error: {0}")]
    Store(#[from] DbError),
}

/// Spendable balance for one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Balance {
    /// Enterprise plans and unlimited allowances.
    Unlimited,
    Amount(#[serde(with = "rust_decimal::serde::float")] Decimal),
}

impl Balance {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Balance::Unlimited)
    }

    /// The amount, or `None` for the unlimited sentinel.
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            Balance::Unlimited => None,
            Balance::Amount(amount) => Some(*amount),
        }
    }

    pub fn covers(&self, cost: Decimal) -> bool {
        match self {
            Balance::Unlimited => true,
            Balance::Amount(amount) => *amount >= cost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCheck {
    pub allowed: bool,
    pub available_balance: Balance,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost: Decimal,
    /// Units left in the allowance when checked. `None` when unlimited.
    #[serde(skip)]
    pub remaining_units: Option<u64>,
}

/// A served request to be written to the ledger.
#[derive(Debug, Clone)]
pub struct UsageRequest {
    pub account_id: Uuid,
    pub api_key_id: Option<Uuid>,
    pub operation: Operation,
    pub quantity: u64,
    pub metadata: UsageMetadata,
    pub origin: Option<String>,
}

type PendingKey = (Uuid, UsageCounter);

/// Units admitted for an account but not yet committed to its counter.
///
/// Dropping the reservation returns the units, whether the request was
/// committed or failed.
#[derive(Debug)]
pub struct Reservation {
    pending: Arc<DashMap<PendingKey, u64>>,
    key: PendingKey,
    quantity: u64,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Entry::Occupied(mut entry) = self.pending.entry(self.key) {
            let left = entry.get().saturating_sub(self.quantity);
            if left == 0 {
                entry.remove();
            } else {
                *entry.get_mut() = left;
            }
        }
    }
}

/// Decides whether an account can afford an operation and records what it spent.
pub struct BalanceEnforcer {
    accounts: Arc<dyn AccountRepo>,
    usage: Arc<dyn UsageRepo>,
    prices: Arc<PriceTable>,
    clock: Arc<dyn Clock>,
    pending: Arc<DashMap<PendingKey, u64>>,
}

impl BalanceEnforcer {
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
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Balance decision against an already loaded plan state. No I/O.
    pub fn evaluate(&self, plan: &AccountPlanState, op: Operation, quantity: u64) -> BalanceCheck {
        let unit_cost = self.prices.unit_cost(op);
        let total_cost = unit_cost * Decimal::from(quantity);
        let counter = UsageCounter::for_kind(op.kind);

        let remaining_units = plan
            .allowance(counter)
            .remaining(plan.consumed_at(counter, self.clock.now()));
        let available_balance = match remaining_units {
            None => Balance::Unlimited,
            Some(units) => Balance::Amount(Decimal::from(units) * unit_cost),
        };

        BalanceCheck {
            allowed: available_balance.covers(total_cost),
            available_balance,
            unit_cost,
            total_cost,
            remaining_units,
        }
    }

    /// Hold `quantity` units of an allowed check until the request commits.
    ///
    /// Units already held by other in-flight requests for the same account
    /// count against the remaining allowance. Returns `Ok(None)` for
    /// unlimited allowances, and the check reduced by the held units when
    /// they leave too little.
    pub fn reserve(
        &self,
        account_id: Uuid,
        op: Operation,
        quantity: u64,
        check: BalanceCheck,
    ) -> Result<Option<Reservation>, BalanceCheck> {
        let Some(remaining) = check.remaining_units else {
            return Ok(None);
        };
        let key = (account_id, UsageCounter::for_kind(op.kind));

        let mut held = self.pending.entry(key).or_insert(0);
        let free = remaining.saturating_sub(*held);
        if free < quantity {
            let available_balance = Balance::Amount(Decimal::from(free) * check.unit_cost);
            drop(held);
            self.pending.remove_if(&key, |_, units| *units == 0);
            metrics::record_balance_check("reserved", op.kind.as_str());
            return Err(BalanceCheck {
                allowed: false,
                available_balance,
                remaining_units: Some(free),
                ..check
            });
        }
        *held += quantity;

        Ok(Some(Reservation {
            pending: Arc::clone(&self.pending),
            key,
            quantity,
        }))
    }

    /// Units currently held for an account's counter.
    pub fn pending_units(&self, account_id: Uuid, counter: UsageCounter) -> u64 {
        self.pending
            .get(&(account_id, counter))
            .map(|units| *units)
            .unwrap_or_default()
    }

    /// Read-only balance check. Store errors are returned to the caller, who
    /// must treat them as a denial.
    pub async fn check_balance(
        &self,
        account_id: Uuid,
        op: Operation,
        quantity: u64,
    ) -> Result<BalanceCheck, BalanceError> {
        let plan = match self.accounts.get(account_id).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                metrics::record_balance_check("error", op.kind.as_str());
                return Err(BalanceError::AccountNotFound(account_id));
            }
            Err(e) => {
                metrics::record_balance_check("error", op.kind.as_str());
                metrics::record_infrastructure_fault("account_store", "check_balance");
                return Err(e.into());
            }
        };

        let check = self.evaluate(&plan, op, quantity);
        let result = if check.available_balance.is_unlimited() {
            "unlimited"
        } else if check.allowed {
            "allowed"
        } else {
            "insufficient"
        };
        metrics::record_balance_check(result, op.kind.as_str());

        Ok(check)
    }

    /// Append one ledger entry for a served request and draw the quantity
    /// from the account's counter.
    ///
    /// The ledger is authoritative: a failed counter increment is logged and
    /// the appended entry is still returned.
    pub async fn commit_usage(
        &self,
        plan: &AccountPlanState,
        request: UsageRequest,
    ) -> Result<UsageLedgerEntry, BalanceError> {
        if request.quantity == 0 {
            return Err(BalanceError::ZeroQuantity);
        }
        if request.metadata.kind() != request.operation.kind {
            return Err(BalanceError::MetadataMismatch {
                operation: request.operation.kind.to_string(),
                metadata: request.metadata.kind().to_string(),
            });
        }

        let now = self.clock.now();
        let op = request.operation;
        let unit_price = self.prices.unit_cost(op);
        let cost = unit_price * Decimal::from(request.quantity);

        let entry = self
            .usage
            .append(NewUsageEntry {
                account_id: request.account_id,
                api_key_id: request.api_key_id,
                price_class: op.class,
                quantity: request.quantity,
                unit_price,
                cost,
                origin: request.origin,
                metadata: request.metadata,
                recorded_at: now,
            })
            .await
            .inspect_err(|e| {
                tracing::error!(
                    account_id = %request.account_id,
                    kind = %op.kind,
                    error = %e,
                    "Failed to append usage ledger entry"
                );
                metrics::record_usage_commit_failure(op.kind.as_str());
            })?;

        let counter = UsageCounter::for_kind(op.kind);
        if !plan.allowance(counter).is_unlimited()
            && let Err(e) = self
                .accounts
                .increment_consumed(request.account_id, counter, request.quantity, now)
                .await
        {
            tracing::warn!(
                account_id = %request.account_id,
                entry_id = %entry.id,
                error = %e,
                "Ledger entry written but consumed counter not updated"
            );
            metrics::record_infrastructure_fault("account_store", "increment_consumed");
        }

        metrics::record_usage_committed(
            op.kind.as_str(),
            entry.quantity,
            rust_decimal::prelude::ToPrimitive::to_f64(&entry.cost).unwrap_or_default(),
        );
        tracing::debug!(
            entry_id = %entry.id,
            account_id = %entry.account_id,
            kind = %entry.kind,
            quantity = entry.quantity,
            cost = %entry.cost,
            "Usage committed"
        );

        Ok(entry)
    }
}
