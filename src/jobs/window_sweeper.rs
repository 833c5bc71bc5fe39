//! Purges rate window records that have aged out of the sliding window.
//!
//! Window stores only look at records inside `[now - window, now]`, so stale
//! records never affect admission. Without the sweep they still accumulate
//! for keys that stop sending traffic.

use std::{sync::Arc, time::Instant};

use crate::{observability::metrics, services::RateLimiter};

/// Results from a single sweep.
#[derive(Debug, Default)]
pub struct SweepRunResult {
    /// Window records removed.
    pub removed: u64,
    pub duration_ms: u64,
}

/// Starts the sweep worker. Runs until the task is cancelled.
pub async fn start_window_sweep_worker(rate_limiter: Arc<RateLimiter>, interval_secs: u64) {
    tracing::info!(interval_secs, "Starting rate window sweep worker");

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        match sweep_once(&rate_limiter).await {
            Ok(result) if result.removed > 0 => {
                tracing::debug!(
                    removed = result.removed,
                    duration_ms = result.duration_ms,
                    "Rate window sweep complete"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Rate window sweep failed");
            }
        }
    }
}

/// Run a single sweep pass.
pub async fn sweep_once(
    rate_limiter: &RateLimiter,
) -> Result<SweepRunResult, crate::cache::CacheError> {
    let start = Instant::now();
    match rate_limiter.sweep().await {
        Ok(removed) => {
            metrics::record_window_sweep(removed, true);
            Ok(SweepRunResult {
                removed,
                duration_ms: start.elapsed().as_millis() as u64,
            })
        }
        Err(e) => {
            metrics::record_window_sweep(0, false);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::{
        cache::MemoryCache,
        clock::ManualClock,
        config::{LimitsConfig, MemoryCacheConfig},
        models::PlanTier,
        services::RateLimitKey,
    };

    #[tokio::test]
    async fn test_sweep_removes_only_expired_records() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryCache::new(&MemoryCacheConfig::default()));
        let limiter = RateLimiter::new(store, clock.clone(), LimitsConfig::default());

        let old = RateLimitKey::Credential(Uuid::new_v4());
        for _ in 0..3 {
            limiter.check(&old, Some(PlanTier::Free)).await;
        }
        clock.advance(Duration::seconds(45));
        let fresh = RateLimitKey::Credential(Uuid::new_v4());
        limiter.check(&fresh, Some(PlanTier::Free)).await;

        clock.advance(Duration::seconds(30));
        let result = sweep_once(&limiter).await.unwrap();
        assert_eq!(result.removed, 3);
        assert_eq!(limiter.peek(&fresh).await, Some(1));

        let again = sweep_once(&limiter).await.unwrap();
        assert_eq!(again.removed, 0);
    }
}
