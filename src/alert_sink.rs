//! Destinations for billing alert notifications.
//!
//! Multiple sinks can be enabled simultaneously; the composite sink fans an
//! alert out to all of them.
//!
//! ## Available Sinks
//!
//! - **EventBusSink**: publishes `ServerEvent::BillingThresholdCrossed` on the in-process bus
//! - **LogSink**: writes a structured log line
//! - **WebhookSink**: POSTs the alert as JSON to a configured URL
//!
//! ## Configuration
//!
//! ```toml
//! [billing.webhook]
//! url = "https://billing.internal/alerts"
//! timeout_secs = 5
//! headers = { Authorization = "Bearer ${BILLING_TOKEN}" }
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::{
    config::WebhookConfig,
    events::{EventBus, ServerEvent},
    models::BillingAlert,
    observability::metrics,
};

/// Receives each billing alert exactly once, right after it is stored.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, alert: &BillingAlert) -> Result<(), SinkError>;

    /// Sink name for logging/metrics.
    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Invalid sink configuration: {0}")]
    Config(String),

    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("No sink accepted the notification")]
    NotDelivered,
}

// ─────────────────────────────────────────────────────────────────────────────
// Event bus
// ─────────────────────────────────────────────────────────────────────────────

pub struct EventBusSink {
    bus: Arc<EventBus>,
}

impl EventBusSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSink for EventBusSink {
    async fn notify(&self, alert: &BillingAlert) -> Result<(), SinkError> {
        let receivers = self.bus.publish(ServerEvent::BillingThresholdCrossed {
            alert_id: alert.id,
            account_id: alert.account_id,
            timestamp: alert.created_at,
            accumulated_cost: alert.accumulated_cost,
            threshold: alert.threshold,
            cycle_start: alert.cycle_start,
        });
        tracing::debug!(alert_id = %alert.id, receivers, "Published billing alert event");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "event_bus"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log
// ─────────────────────────────────────────────────────────────────────────────

pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, alert: &BillingAlert) -> Result<(), SinkError> {
        tracing::info!(
            alert_id = %alert.id,
            account_id = %alert.account_id,
            accumulated_cost = alert.accumulated_cost,
            threshold = alert.threshold,
            cycle_start = %alert.cycle_start,
            "Billing threshold crossed"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhook
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    alert: &'a BillingAlert,
}

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn from_config(config: &WebhookConfig) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SinkError::Config(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| SinkError::Config(format!("invalid value for header '{name}'")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, alert: &BillingAlert) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                event: "billing_threshold_crossed",
                alert,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Composite
// ─────────────────────────────────────────────────────────────────────────────

/// Delivers to every sink. Succeeds if at least one sink accepted the alert.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl NotificationSink for CompositeSink {
    async fn notify(&self, alert: &BillingAlert) -> Result<(), SinkError> {
        let mut delivered = 0;
        let mut last_error = None;

        for sink in &self.sinks {
            match sink.notify(alert).await {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_notification(sink.name(), true);
                }
                Err(e) => {
                    tracing::error!(sink = sink.name(), alert_id = %alert.id, error = %e, "Billing alert notification failed");
                    metrics::record_notification(sink.name(), false);
                    last_error = Some(e);
                }
            }
        }

        if delivered > 0 {
            Ok(())
        } else {
            Err(last_error.unwrap_or(SinkError::NotDelivered))
        }
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// Sink that keeps every alert it receives.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    pub alerts: parking_lot::Mutex<Vec<BillingAlert>>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn received(&self) -> Vec<BillingAlert> {
        self.alerts.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, alert: &BillingAlert) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Status(500));
        }
        self.alerts.lock().push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
