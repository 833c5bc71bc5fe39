//! Unit prices and cycle cost aggregation.
//!
//! Ledger rows carry the undiscounted unit price in effect when they were
//! written. The bulk discount is applied only when a cycle is aggregated: once
//! an account's cycle quantity for a kind exceeds the bulk threshold, every row
//! of that kind in the cycle is billed at the discounted rate.

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    config::ConfigError,
    models::{KindTotal, Operation, OperationKind, PriceClass},
};

/// Pricing configuration, in currency units per unit of quantity.
///
/// ```toml
/// [pricing]
/// basic = "0.01"
/// advanced = "0.05"
/// institutional = "0.10"
/// bulk_threshold = 10000
/// bulk_discount_percent = "20"
///
/// [pricing.overrides.export]
/// basic = "0.02"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    #[serde(default = "default_basic")]
    pub basic: Decimal,

    #[serde(default = "default_advanced")]
    pub advanced: Decimal,

    #[serde(default = "default_institutional")]
    pub institutional: Decimal,

    /// Per-kind prices that replace the class defaults above.
    #[serde(default)]
    pub overrides: KindOverrides,

    /// Cycle quantity of one kind above which the discount applies.
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: u64,

    #[serde(default = "default_bulk_discount")]
    pub bulk_discount_percent: Decimal,

    /// Minor units per currency unit (100 for cents).
    #[serde(default = "default_minor_units")]
    pub minor_units_per_unit: u32,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            basic: default_basic(),
            advanced: default_advanced(),
            institutional: default_institutional(),
            overrides: KindOverrides::default(),
            bulk_threshold: default_bulk_threshold(),
            bulk_discount_percent: default_bulk_discount(),
            minor_units_per_unit: default_minor_units(),
        }
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut prices = vec![self.basic, self.advanced, self.institutional];
        for class in [
            &self.overrides.api_call,
            &self.overrides.prediction,
            &self.overrides.export,
        ]
        .into_iter()
        .flatten()
        {
            prices.extend(
                [class.basic, class.advanced, class.institutional]
                    .into_iter()
                    .flatten(),
            );
        }
        if prices.iter().any(|p| p.is_sign_negative()) {
            return Err(ConfigError::Validation(
                "pricing unit costs cannot be negative".into(),
            ));
        }
        if self.bulk_discount_percent.is_sign_negative()
            || self.bulk_discount_percent > Decimal::ONE_HUNDRED
        {
            return Err(ConfigError::Validation(
                "pricing.bulk_discount_percent must be between 0 and 100".into(),
            ));
        }
        if self.minor_units_per_unit == 0 {
            return Err(ConfigError::Validation(
                "pricing.minor_units_per_unit must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KindOverrides {
    #[serde(default)]
    pub api_call: Option<ClassPrices>,
    #[serde(default)]
    pub prediction: Option<ClassPrices>,
    #[serde(default)]
    pub export: Option<ClassPrices>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassPrices {
    #[serde(default)]
    pub basic: Option<Decimal>,
    #[serde(default)]
    pub advanced: Option<Decimal>,
    #[serde(default)]
    pub institutional: Option<Decimal>,
}

impl ClassPrices {
    fn get(&self, class: PriceClass) -> Option<Decimal> {
        match class {
            PriceClass::Basic => self.basic,
            PriceClass::Advanced => self.advanced,
            PriceClass::Institutional => self.institutional,
        }
    }
}

fn default_basic() -> Decimal {
    Decimal::new(1, 2)
}

fn default_advanced() -> Decimal {
    Decimal::new(5, 2)
}

fn default_institutional() -> Decimal {
    Decimal::new(10, 2)
}

fn default_bulk_threshold() -> u64 {
    10_000
}

fn default_bulk_discount() -> Decimal {
    Decimal::from(20)
}

fn default_minor_units() -> u32 {
    100
}

/// Resolved price lookups shared by the enforcer, the monitor and the ledger view.
#[derive(Debug, Clone)]
pub struct PriceTable {
    config: PricingConfig,
}

impl PriceTable {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn unit_cost(&self, op: Operation) -> Decimal {
        let overrides = match op.kind {
            OperationKind::ApiCall => &self.config.overrides.api_call,
            OperationKind::Prediction => &self.config.overrides.prediction,
            OperationKind::Export => &self.config.overrides.export,
        };
        overrides
            .as_ref()
            .and_then(|o| o.get(op.class))
            .unwrap_or(match op.class {
                PriceClass::Basic => self.config.basic,
                PriceClass::Advanced => self.config.advanced,
                PriceClass::Institutional => self.config.institutional,
            })
    }

    pub fn total_cost(&self, op: Operation, quantity: u64) -> Decimal {
        self.unit_cost(op) * Decimal::from(quantity)
    }

    /// Apply the bulk discount to per-kind cycle totals.
    pub fn aggregate(&self, totals: &[KindTotal]) -> CycleCost {
        let factor = Decimal::ONE - self.config.bulk_discount_percent / Decimal::ONE_HUNDRED;
        let mut kinds: Vec<KindCost> = totals
            .iter()
            .map(|t| {
                let discounted = t.quantity > self.config.bulk_threshold;
                let net = if discounted { t.cost * factor } else { t.cost };
                KindCost {
                    kind: t.kind,
                    quantity: t.quantity,
                    gross: t.cost,
                    net,
                    discounted,
                }
            })
            .collect();
        kinds.sort_by_key(|k| k.kind);

        let gross = kinds.iter().map(|k| k.gross).sum();
        let net = kinds.iter().map(|k| k.net).sum();
        CycleCost { kinds, gross, net }
    }

    /// Convert a currency amount to whole minor units, rounding half away from zero.
    pub fn to_minor_units(&self, amount: Decimal) -> i64 {
        (amount * Decimal::from(self.config.minor_units_per_unit))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindCost {
    pub kind: OperationKind,
    pub quantity: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub gross: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net: Decimal,
    pub discounted: bool,
}

/// Cycle-to-date cost of one account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleCost {
    pub kinds: Vec<KindCost>,
    #[serde(with = "rust_decimal::serde::float")]
    pub gross: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net: Decimal,
}
