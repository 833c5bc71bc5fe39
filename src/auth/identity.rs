use uuid::Uuid;

use crate::models::{AccountPlanState, PlanTier};

/// A verified caller: the credential that was presented and the plan state of
/// the account that owns it, read in the same lookup.
#[derive(Debug, Clone)]
pub struct Identity {
    pub api_key_id: Uuid,
    pub account_id: Uuid,
    /// Display prefix of the key, safe to log
    pub key_prefix: String,
    pub plan: AccountPlanState,
}

impl Identity {
    pub fn tier(&self) -> PlanTier {
        self.plan.tier
    }
}
