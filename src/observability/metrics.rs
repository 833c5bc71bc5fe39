//! Prometheus metrics for the gateway.
//!
//! Provides metrics for:
//! - HTTP request latency and counts
//! - Authentication, rate-limit and balance decisions
//! - Metered usage and billing alerts
//! - Infrastructure faults in the window store and account store
//!
//! Without the `prometheus` feature every `record_*` function is a no-op.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_str = status.to_string();
        let status_class = format!("{}xx", status / 100);

        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status_str, "status_class" => status_class.clone())
            .increment(1);

        histogram!("http_request_duration_seconds", "method" => method.to_string(), "path" => path.to_string(), "status_class" => status_class)
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

/// Record an authentication attempt.
///
/// # Arguments
/// * `outcome` - "success" or the rejection kind (e.g. "expired_credential")
pub fn record_auth_attempt(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        let status = if outcome == "success" {
            "success"
        } else {
            "failure"
        };
        counter!("auth_attempts_total", "status" => status.to_string(), "outcome" => outcome.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record a rate limit decision.
///
/// # Arguments
/// * `result` - "allowed", "limited", "bypassed" or "degraded"
/// * `tier` - plan tier, or "anonymous" for address-keyed checks
pub fn record_rate_limit(result: &str, tier: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("rate_limit_checks_total", "result" => result.to_string(), "tier" => tier.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (result, tier);
    }
}

/// Record a balance decision.
///
/// # Arguments
/// * `result` - "allowed", "unlimited", "insufficient", "reserved" or "error"
/// * `kind` - operation kind being checked
pub fn record_balance_check(result: &str, kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("balance_checks_total", "result" => result.to_string(), "kind" => kind.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (result, kind);
    }
}

/// Record a committed ledger entry.
pub fn record_usage_committed(kind: &str, quantity: u64, cost: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("usage_units_total", "kind" => kind.to_string()).increment(quantity);
        counter!("usage_entries_total", "kind" => kind.to_string()).increment(1);
        histogram!("usage_entry_cost", "kind" => kind.to_string()).record(cost);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, quantity, cost);
    }
}

/// Record units a consumed counter was clamped by at its allowance.
pub fn record_allowance_overrun(kind: &str, units: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("allowance_overrun_units_total", "kind" => kind.to_string()).increment(units);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, units);
    }
}

/// Record a usage commit that did not reach the store.
pub fn record_usage_commit_failure(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("usage_commit_failures_total", "kind" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Record a billing threshold check.
///
/// # Arguments
/// * `outcome` - "below", "alerted", "already_alerted", "error" or "dropped"
pub fn record_billing_check(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("billing_threshold_checks_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Record a notification delivery attempt.
pub fn record_notification(sink: &str, success: bool) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "error" };
        counter!("billing_notifications_total", "sink" => sink.to_string(), "status" => status.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (sink, success);
    }
}

/// Record an infrastructure fault.
///
/// # Arguments
/// * `component` - "window_store", "account_store" or "ledger"
/// * `operation` - what was being attempted
pub fn record_infrastructure_fault(component: &str, operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "infrastructure_faults_total",
            "component" => component.to_string(),
            "operation" => operation.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (component, operation);
    }
}

/// Record a gateway rejection by error kind.
pub fn record_gateway_rejection(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("gateway_rejections_total", "kind" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Record time spent in the admission stages (before dispatch).
pub fn record_admission_duration(duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!("gateway_admission_duration_seconds").record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = duration_secs;
    }
}

/// Record a window sweep pass.
pub fn record_window_sweep(removed: u64, success: bool) {
    #[cfg(feature = "prometheus")]
    {
        let status = if success { "success" } else { "error" };
        counter!("window_sweeps_total", "status" => status.to_string()).increment(1);
        counter!("window_records_purged_total").increment(removed);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (removed, success);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
