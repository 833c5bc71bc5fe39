use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of metered operation recorded in the usage ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ApiCall,
    Prediction,
    Export,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ApiCall => "api_call",
            OperationKind::Prediction => "prediction",
            OperationKind::Export => "export",
        }
    }

    pub fn all() -> &'static [OperationKind] {
        &[
            OperationKind::ApiCall,
            OperationKind::Prediction,
            OperationKind::Export,
        ]
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api_call" => Ok(OperationKind::ApiCall),
            "prediction" => Ok(OperationKind::Prediction),
            "export" => Ok(OperationKind::Export),
            _ => Err(format!("Invalid operation kind '{}'", s)),
        }
    }
}

/// Price sub-classification of an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceClass {
    #[default]
    Basic,
    Advanced,
    Institutional,
}

impl PriceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceClass::Basic => "basic",
            PriceClass::Advanced => "advanced",
            PriceClass::Institutional => "institutional",
        }
    }
}

impl fmt::Display for PriceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PriceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(PriceClass::Basic),
            "advanced" => Ok(PriceClass::Advanced),
            "institutional" => Ok(PriceClass::Institutional),
            _ => Err(format!("Invalid price class '{}'", s)),
        }
    }
}

/// A priced operation: what is being metered and at which class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    #[serde(default)]
    pub class: PriceClass,
}

impl Operation {
    pub fn new(kind: OperationKind, class: PriceClass) -> Self {
        Self { kind, class }
    }

    pub fn api_call() -> Self {
        Self::new(OperationKind::ApiCall, PriceClass::Basic)
    }

    pub fn prediction(class: PriceClass) -> Self {
        Self::new(OperationKind::Prediction, class)
    }
}

/// Typed details attached to a ledger entry, one variant per operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageMetadata {
    ApiCall { endpoint: String, method: String },
    Prediction { symbol: String },
    Export { format: String, size_bytes: u64 },
}

impl UsageMetadata {
    pub fn kind(&self) -> OperationKind {
        match self {
            UsageMetadata::ApiCall { .. } => OperationKind::ApiCall,
            UsageMetadata::Prediction { .. } => OperationKind::Prediction,
            UsageMetadata::Export { .. } => OperationKind::Export,
        }
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Credential that made the request, if any.
    pub api_key_id: Option<Uuid>,
    pub kind: OperationKind,
    pub price_class: PriceClass,
    pub quantity: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    /// Caller network address.
    pub origin: Option<String>,
    pub metadata: UsageMetadata,
    pub recorded_at: DateTime<Utc>,
}

/// Input for appending a ledger row. The kind is taken from the metadata.
#[derive(Debug, Clone)]
pub struct NewUsageEntry {
    pub account_id: Uuid,
    pub api_key_id: Option<Uuid>,
    pub price_class: PriceClass,
    pub quantity: u64,
    pub unit_price: Decimal,
    pub cost: Decimal,
    pub origin: Option<String>,
    pub metadata: UsageMetadata,
    pub recorded_at: DateTime<Utc>,
}

impl NewUsageEntry {
    pub fn kind(&self) -> OperationKind {
        self.metadata.kind()
    }

    pub fn into_entry(self, id: Uuid) -> UsageLedgerEntry {
        UsageLedgerEntry {
            id,
            account_id: self.account_id,
            api_key_id: self.api_key_id,
            kind: self.metadata.kind(),
            price_class: self.price_class,
            quantity: self.quantity,
            unit_price: self.unit_price,
            cost: self.cost,
            origin: self.origin,
            metadata: self.metadata,
            recorded_at: self.recorded_at,
        }
    }
}

/// Undiscounted per-kind sums over a slice of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindTotal {
    pub kind: OperationKind,
    pub quantity: u64,
    pub cost: Decimal,
}
