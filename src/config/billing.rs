use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Billing threshold alerts.
///
/// ```toml
/// [billing]
/// threshold_minor_units = 1000
///
/// [billing.webhook]
/// url = "https://billing.internal/alerts"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BillingConfig {
    /// Cycle spend, in minor currency units, that raises an alert.
    #[serde(default = "default_threshold")]
    pub threshold_minor_units: i64,

    #[serde(default)]
    pub queue: BillingQueueConfig,

    /// Optional HTTP endpoint notified of each alert.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            threshold_minor_units: default_threshold(),
            queue: BillingQueueConfig::default(),
            webhook: None,
        }
    }
}

impl BillingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold_minor_units <= 0 {
            return Err(ConfigError::Validation(
                "billing.threshold_minor_units must be greater than 0".into(),
            ));
        }
        self.queue.validate()?;
        if let Some(webhook) = &self.webhook {
            webhook.validate()?;
        }
        Ok(())
    }
}

fn default_threshold() -> i64 {
    1000
}

/// Queue between the request path and the threshold monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BillingQueueConfig {
    /// Checks waiting beyond this are dropped (alerts are advisory).
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Checks processed per worker pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for BillingQueueConfig {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl BillingQueueConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending == 0 || self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "billing.queue max_pending and batch_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_pending() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,

    /// Extra headers sent with every notification (e.g. an auth token).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl WebhookConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "billing.webhook.url must be an http(s) URL, got '{}'",
                self.url
            )));
        }
        Ok(())
    }
}

fn default_webhook_timeout() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.threshold_minor_units, 1000);
        assert!(config.webhook.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_webhook_url_must_be_http() {
        let config: BillingConfig = toml::from_str(
            r#"
            [webhook]
            url = "ftp://example.com"
        "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
