use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;
use validator::Validate;

use super::OperationKind;

/// Subscription level. Determines the per-window rate cap and whether
/// allowances apply at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Basic,
    Professional,
    /// Unlimited rate and balance.
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Basic => "basic",
            PlanTier::Professional => "professional",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, PlanTier::Enterprise)
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "basic" => Ok(PlanTier::Basic),
            "professional" => Ok(PlanTier::Professional),
            "enterprise" => Ok(PlanTier::Enterprise),
            _ => Err(format!("Invalid plan tier '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Trial,
    PastDue,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Trial => "trial",
            PlanStatus::PastDue => "past_due",
            PlanStatus::Cancelled => "cancelled",
        }
    }

    /// Only an active plan may consume metered resources.
    pub fn is_active(&self) -> bool {
        matches!(self, PlanStatus::Active)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PlanStatus::Active),
            "trial" => Ok(PlanStatus::Trial),
            "past_due" => Ok(PlanStatus::PastDue),
            "cancelled" => Ok(PlanStatus::Cancelled),
            _ => Err(format!("Invalid plan status '{}'", s)),
        }
    }
}

/// Per-cycle quota for one counter.
///
/// Persisted and serialized as a signed integer where `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Allowance {
    Unlimited,
    Limited(u64),
}

impl Allowance {
    pub const UNLIMITED_SENTINEL: i64 = -1;

    pub fn from_i64(value: i64) -> Self {
        if value < 0 {
            Allowance::Unlimited
        } else {
            Allowance::Limited(value as u64)
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            Allowance::Unlimited => Self::UNLIMITED_SENTINEL,
            Allowance::Limited(n) => n.min(i64::MAX as u64) as i64,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Allowance::Unlimited)
    }

    /// Units still available after `consumed`.
    pub fn remaining(&self, consumed: u64) -> Option<u64> {
        match self {
            Allowance::Unlimited => None,
            Allowance::Limited(n) => Some(n.saturating_sub(consumed)),
        }
    }
}

impl Serialize for Allowance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.to_i64())
    }
}

impl<'de> Deserialize<'de> for Allowance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Allowance::from_i64)
    }
}

/// Which consumed counter an operation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageCounter {
    Calls,
    Predictions,
}

impl UsageCounter {
    /// Exports are metered against the call allowance.
    pub fn for_kind(kind: OperationKind) -> Self {
        match kind {
            OperationKind::ApiCall | OperationKind::Export => UsageCounter::Calls,
            OperationKind::Prediction => UsageCounter::Predictions,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageCounter::Calls => "calls",
            UsageCounter::Predictions => "predictions",
        }
    }
}

/// A billing cycle window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingCycle {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingCycle {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Subscription state of the account that owns a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPlanState {
    pub id: Uuid,
    pub name: String,
    pub tier: PlanTier,
    pub status: PlanStatus,
    pub call_allowance: Allowance,
    pub calls_consumed: u64,
    pub prediction_allowance: Allowance,
    pub predictions_consumed: u64,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountPlanState {
    pub fn allowance(&self, counter: UsageCounter) -> Allowance {
        if self.tier.is_unlimited() {
            return Allowance::Unlimited;
        }
        match counter {
            UsageCounter::Calls => self.call_allowance,
            UsageCounter::Predictions => self.prediction_allowance,
        }
    }

    /// Stored counter value, ignoring cycle boundaries.
    pub fn stored_consumed(&self, counter: UsageCounter) -> u64 {
        match counter {
            UsageCounter::Calls => self.calls_consumed,
            UsageCounter::Predictions => self.predictions_consumed,
        }
    }

    /// Consumed units within the cycle containing `now`.
    ///
    /// Once the stored cycle has ended the counters belong to a past cycle and
    /// read as zero until the cycle owner resets the record.
    pub fn consumed_at(&self, counter: UsageCounter, now: DateTime<Utc>) -> u64 {
        if now >= self.cycle_end {
            0
        } else {
            self.stored_consumed(counter)
        }
    }

    /// The billing cycle containing `now`.
    ///
    /// Rolls the stored cycle forward in whole cycle lengths when it has
    /// already ended.
    pub fn cycle_at(&self, now: DateTime<Utc>) -> BillingCycle {
        if now < self.cycle_end {
            return BillingCycle {
                start: self.cycle_start,
                end: self.cycle_end,
            };
        }

        let mut length = self.cycle_end - self.cycle_start;
        if length <= Duration::zero() {
            length = Duration::days(30);
        }
        let elapsed = (now - self.cycle_end).num_milliseconds();
        let periods = elapsed / length.num_milliseconds().max(1);
        let start = self.cycle_end + length * (periods as i32);
        BillingCycle {
            start,
            end: start + length,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAccount {
    /// Pre-assigned identifier. Generated when absent.
    pub id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub tier: PlanTier,
    pub status: PlanStatus,
    pub call_allowance: Allowance,
    pub prediction_allowance: Allowance,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
}
