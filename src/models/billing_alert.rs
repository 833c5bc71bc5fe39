use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raised once per account per billing cycle when cycle spend reaches the
/// configured threshold. Amounts are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingAlert {
    pub id: Uuid,
    pub account_id: Uuid,
    pub accumulated_cost: i64,
    pub threshold: i64,
    /// Start of the cycle the alert belongs to (deduplication key)
    pub cycle_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBillingAlert {
    pub account_id: Uuid,
    pub accumulated_cost: i64,
    pub threshold: i64,
    pub cycle_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewBillingAlert {
    pub fn into_alert(self, id: Uuid) -> BillingAlert {
        BillingAlert {
            id,
            account_id: self.account_id,
            accumulated_cost: self.accumulated_cost,
            threshold: self.threshold,
            cycle_start: self.cycle_start,
            created_at: self.created_at,
        }
    }
}
