//! Process-local repositories.
//!
//! Backs every repository trait with concurrent maps so the gateway can run
//! without a database (development, tests, single-node demos). Nothing
//! survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use super::{
    error::{DbError, DbResult},
    repos::{
        AccountRepo, ApiKeyRepo, BillingAlertRepo, UsageRepo, apply_increment, fold_totals,
    },
};
use crate::models::{
    AccountPlanState, ApiKey, ApiKeyWithAccount, BillingAlert, BillingCycle, CreateAccount,
    CreateApiKey, KindTotal, NewBillingAlert, NewUsageEntry, PlanStatus, PlanTier, UsageCounter,
    UsageLedgerEntry,
};

#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<Uuid, AccountPlanState>,
    api_keys: DashMap<Uuid, ApiKey>,
    /// key hash -> key id
    key_hashes: DashMap<String, Uuid>,
    /// account -> entries in append order
    ledger: DashMap<Uuid, Vec<UsageLedgerEntry>>,
    /// (account, cycle start) -> alert
    alerts: DashMap<(Uuid, DateTime<Utc>), BillingAlert>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepo for MemoryStore {
    async fn create(&self, input: CreateAccount, now: DateTime<Utc>) -> DbResult<AccountPlanState> {
        let id = input.id.unwrap_or_else(Uuid::new_v4);
        match self.accounts.entry(id) {
            Entry::Occupied(_) => Err(DbError::Conflict(format!(
                "Account '{}' already exists",
                id
            ))),
            Entry::Vacant(slot) => {
                let account = AccountPlanState {
                    id,
                    name: input.name,
                    tier: input.tier,
                    status: input.status,
                    call_allowance: input.call_allowance,
                    calls_consumed: 0,
                    prediction_allowance: input.prediction_allowance,
                    predictions_consumed: 0,
                    cycle_start: input.cycle_start,
                    cycle_end: input.cycle_end,
                    created_at: now,
                    updated_at: now,
                };
                slot.insert(account.clone());
                Ok(account)
            }
        }
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<AccountPlanState>> {
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn list(&self) -> DbResult<Vec<AccountPlanState>> {
        let mut accounts: Vec<_> = self.accounts.iter().map(|a| a.clone()).collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn increment_consumed(
        &self,
        id: Uuid,
        counter: UsageCounter,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> DbResult<AccountPlanState> {
        let mut account = self.accounts.get_mut(&id).ok_or(DbError::NotFound)?;
        apply_increment(&mut account, counter, quantity, now);
        Ok(account.clone())
    }

    async fn update_plan(
        &self,
        id: Uuid,
        tier: PlanTier,
        status: PlanStatus,
        now: DateTime<Utc>,
    ) -> DbResult<AccountPlanState> {
        let mut account = self.accounts.get_mut(&id).ok_or(DbError::NotFound)?;
        account.tier = tier;
        account.status = status;
        account.updated_at = now;
        Ok(account.clone())
    }
}

#[async_trait]
impl ApiKeyRepo for MemoryStore {
    async fn create(
        &self,
        input: CreateApiKey,
        key_hash: &str,
        key_prefix: &str,
        now: DateTime<Utc>,
    ) -> DbResult<ApiKey> {
        if !self.accounts.contains_key(&input.account_id) {
            return Err(DbError::Validation(format!(
                "Account '{}' does not exist",
                input.account_id
            )));
        }

        let key = ApiKey {
            id: Uuid::new_v4(),
            account_id: input.account_id,
            name: input.name,
            key_prefix: key_prefix.to_string(),
            active: true,
            expires_at: input.expires_at,
            last_used_at: None,
            usage_count: 0,
            created_at: now,
        };

        match self.key_hashes.entry(key_hash.to_string()) {
            Entry::Occupied(_) => Err(DbError::Conflict(
                "API key with this hash already exists".to_string(),
            )),
            Entry::Vacant(slot) => {
                self.api_keys.insert(key.id, key.clone());
                slot.insert(key.id);
                Ok(key)
            }
        }
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ApiKey>> {
        Ok(self.api_keys.get(&id).map(|k| k.clone()))
    }

    async fn get_by_hash(&self, key_hash: &str) -> DbResult<Option<ApiKeyWithAccount>> {
        let Some(id) = self.key_hashes.get(key_hash).map(|id| *id) else {
            return Ok(None);
        };
        let Some(key) = self.api_keys.get(&id).map(|k| k.clone()) else {
            return Ok(None);
        };
        let Some(account) = self.accounts.get(&key.account_id).map(|a| a.clone()) else {
            return Ok(None);
        };
        Ok(Some(ApiKeyWithAccount { key, account }))
    }

    async fn list_by_account(&self, account_id: Uuid) -> DbResult<Vec<ApiKey>> {
        let mut keys: Vec<_> = self
            .api_keys
            .iter()
            .filter(|k| k.account_id == account_id)
            .map(|k| k.clone())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn record_use(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let mut key = self.api_keys.get_mut(&id).ok_or(DbError::NotFound)?;
        key.last_used_at = Some(at);
        key.usage_count = key.usage_count.saturating_add(1);
        Ok(())
    }

    async fn deactivate(&self, id: Uuid) -> DbResult<()> {
        let mut key = self.api_keys.get_mut(&id).ok_or(DbError::NotFound)?;
        key.active = false;
        Ok(())
    }
}

#[async_trait]
impl UsageRepo for MemoryStore {
    async fn append(&self, entry: NewUsageEntry) -> DbResult<UsageLedgerEntry> {
        let entry = entry.into_entry(Uuid::new_v4());
        self.ledger
            .entry(entry.account_id)
            .or_default()
            .push(entry.clone());
        Ok(entry)
    }

    async fn cycle_totals(
        &self,
        account_id: Uuid,
        cycle: BillingCycle,
        exclude: Option<Uuid>,
    ) -> DbResult<Vec<KindTotal>> {
        let Some(entries) = self.ledger.get(&account_id) else {
            return Ok(Vec::new());
        };
        Ok(fold_totals(
            entries
                .iter()
                .filter(|e| cycle.contains(e.recorded_at))
                .filter(|e| Some(e.id) != exclude)
                .map(|e| (e.kind, e.quantity, e.cost)),
        ))
    }

    async fn list_recent(&self, account_id: Uuid, limit: usize) -> DbResult<Vec<UsageLedgerEntry>> {
        let Some(entries) = self.ledger.get(&account_id) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BillingAlertRepo for MemoryStore {
    async fn create(&self, alert: NewBillingAlert) -> DbResult<BillingAlert> {
        match self.alerts.entry((alert.account_id, alert.cycle_start)) {
            Entry::Occupied(_) => Err(DbError::Conflict(format!(
                "Billing alert already raised for account '{}' in this cycle",
                alert.account_id
            ))),
            Entry::Vacant(slot) => {
                let alert = alert.into_alert(Uuid::new_v4());
                slot.insert(alert.clone());
                Ok(alert)
            }
        }
    }

    async fn find_in_cycle(
        &self,
        account_id: Uuid,
        cycle_start: DateTime<Utc>,
    ) -> DbResult<Option<BillingAlert>> {
        Ok(self
            .alerts
            .get(&(account_id, cycle_start))
            .map(|a| a.clone()))
    }

    async fn list_by_account(&self, account_id: Uuid) -> DbResult<Vec<BillingAlert>> {
        let mut alerts: Vec<_> = self
            .alerts
            .iter()
            .filter(|a| a.account_id == account_id)
            .map(|a| a.clone())
            .collect();
        alerts.sort_by(|a, b| b.cycle_start.cmp(&a.cycle_start));
        Ok(alerts)
    }
}
