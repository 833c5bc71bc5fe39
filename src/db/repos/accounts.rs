use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{AccountPlanState, Allowance, CreateAccount, PlanStatus, PlanTier, UsageCounter},
    observability::metrics,
};

#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn create(&self, input: CreateAccount, now: DateTime<Utc>) -> DbResult<AccountPlanState>;
    async fn get(&self, id: Uuid) -> DbResult<Option<AccountPlanState>>;
    async fn list(&self) -> DbResult<Vec<AccountPlanState>>;

    /// Add `quantity` to one consumed counter.
    ///
    /// If the stored cycle has ended at `now`, the cycle is rolled forward and
    /// both counters restart from zero before the increment. A limited counter
    /// never exceeds its allowance. Returns the updated state.
    async fn increment_consumed(
        &self,
        id: Uuid,
        counter: UsageCounter,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> DbResult<AccountPlanState>;

    async fn update_plan(
        &self,
        id: Uuid,
        tier: PlanTier,
        status: PlanStatus,
        now: DateTime<Utc>,
    ) -> DbResult<AccountPlanState>;
}

/// Apply a counter increment to an in-memory copy of the account.
///
/// Shared by every backend so cycle rollover and clamping behave identically.
/// Clamping means admission let through more than the allowance, so the
/// excess is logged and counted rather than dropped silently.
pub fn apply_increment(
    state: &mut AccountPlanState,
    counter: UsageCounter,
    quantity: u64,
    now: DateTime<Utc>,
) {
    if now >= state.cycle_end {
        let cycle = state.cycle_at(now);
        state.cycle_start = cycle.start;
        state.cycle_end = cycle.end;
        state.calls_consumed = 0;
        state.predictions_consumed = 0;
    }

    let mut consumed = state.stored_consumed(counter).saturating_add(quantity);
    if let Allowance::Limited(max) = state.allowance(counter)
        && consumed > max
    {
        tracing::warn!(
            account_id = %state.id,
            counter = counter.as_str(),
            consumed,
            allowance = max,
            "Consumed counter clamped at allowance"
        );
        metrics::record_allowance_overrun(counter.as_str(), consumed - max);
        consumed = max;
    }
    match counter {
        UsageCounter::Calls => state.calls_consumed = consumed,
        UsageCounter::Predictions => state.predictions_consumed = consumed,
    }
    state.updated_at = now;
}
