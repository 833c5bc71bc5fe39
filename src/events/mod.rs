//! Event broadcasting for in-process subscribers.
//!
//! Services publish events to the bus; anything embedding the gateway can
//! subscribe (dashboards, billing integrations, tests).
//!
//! # Example
//!
//! ```ignore
//! // Publishing an event
//! event_bus.publish(ServerEvent::BillingThresholdCrossed { ... });
//!
//! // Subscribing to events
//! let mut rx = event_bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     // Handle event
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity for the event bus.
/// This determines how many events can be buffered before slow receivers
/// start missing events (lagging).
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Event topics for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    /// Spend threshold alerts
    Billing,
    /// Committed ledger entries
    Usage,
    /// Rate limit rejections
    RateLimit,
    /// All events (wildcard subscription)
    All,
}

impl EventTopic {
    /// `All` matches everything, otherwise exact match is required.
    pub fn matches(&self, other: &EventTopic) -> bool {
        matches!(self, EventTopic::All) || matches!(other, EventTopic::All) || self == other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// An account's cycle spend reached the alert threshold.
    BillingThresholdCrossed {
        alert_id: Uuid,
        account_id: Uuid,
        timestamp: DateTime<Utc>,
        /// Minor currency units
        accumulated_cost: i64,
        threshold: i64,
        cycle_start: DateTime<Utc>,
    },

    /// A served request was metered.
    UsageCommitted {
        entry_id: Uuid,
        account_id: Uuid,
        api_key_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
        kind: String,
        quantity: u64,
        #[serde(with = "rust_decimal::serde::float")]
        cost: rust_decimal::Decimal,
    },

    /// A request was turned away by the sliding window.
    RateLimitExceeded {
        timestamp: DateTime<Utc>,
        api_key_id: Option<Uuid>,
        limit: u32,
        window_secs: u64,
    },
}

impl ServerEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            ServerEvent::BillingThresholdCrossed { .. } => EventTopic::Billing,
            ServerEvent::UsageCommitted { .. } => EventTopic::Usage,
            ServerEvent::RateLimitExceeded { .. } => EventTopic::RateLimit,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::BillingThresholdCrossed { .. } => "billing_threshold_crossed",
            ServerEvent::UsageCommitted { .. } => "usage_committed",
            ServerEvent::RateLimitExceeded { .. } => "rate_limit_exceeded",
        }
    }
}

/// Central event bus for broadcasting server events.
///
/// Uses a tokio broadcast channel so every subscriber sees every event.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
    events_published: AtomicU64,
    /// Events published while nobody was listening
    events_dropped: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: ServerEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// If the receiver falls behind, it will receive `RecvError::Lagged`
    /// indicating how many events were missed.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold_event() -> ServerEvent {
        ServerEvent::BillingThresholdCrossed {
            alert_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            accumulated_cost: 1005,
            threshold: 1000,
            cycle_start: Utc::now(),
        }
    }

    #[test]
    fn test_event_topic_matches() {
        assert!(EventTopic::All.matches(&EventTopic::Billing));
        assert!(EventTopic::Billing.matches(&EventTopic::All));
        assert!(EventTopic::Usage.matches(&EventTopic::Usage));
        assert!(!EventTopic::Usage.matches(&EventTopic::Billing));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(threshold_event()).unwrap();
        assert_eq!(json["event_type"], "billing_threshold_crossed");
        assert_eq!(json["accumulated_cost"], 1005);
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(threshold_event()), 0);
        assert_eq!(bus.events_published(), 1);
        assert_eq!(bus.events_dropped(), 1);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(threshold_event()), 2);
        assert_eq!(rx1.recv().await.unwrap().topic(), EventTopic::Billing);
        assert_eq!(
            rx2.recv().await.unwrap().event_type(),
            "billing_threshold_crossed"
        );
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for _ in 0..4 {
            bus.publish(threshold_event());
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
    }
}
