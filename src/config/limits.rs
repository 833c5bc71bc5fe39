use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::PlanTier;

/// Sliding-window rate limits.
///
/// ```toml
/// [limits]
/// window_secs = 60
/// free = 60
/// basic = 600
/// professional = 6000
/// ```
///
/// Enterprise plans are never counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Length of the trailing window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_free")]
    pub free: u32,

    #[serde(default = "default_basic")]
    pub basic: u32,

    #[serde(default = "default_professional")]
    pub professional: u32,

    /// Cap for requests keyed by network address (no usable credential).
    #[serde(default = "default_free")]
    pub anonymous: u32,

    /// How often the background sweep purges expired window records.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            free: default_free(),
            basic: default_basic(),
            professional: default_professional(),
            anonymous: default_free(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl LimitsConfig {
    /// Per-window cap for a tier. `None` means the tier is not counted.
    pub fn limit_for(&self, tier: PlanTier) -> Option<u32> {
        match tier {
            PlanTier::Free => Some(self.free),
            PlanTier::Basic => Some(self.basic),
            PlanTier::Professional => Some(self.professional),
            PlanTier::Enterprise => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_secs == 0 {
            return Err(ConfigError::Validation(
                "limits.window_secs must be greater than 0".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "limits.sweep_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_free() -> u32 {
    60
}

fn default_basic() -> u32 {
    600
}

fn default_professional() -> u32 {
    6000
}

fn default_sweep_interval_secs() -> u64 {
    30
}
