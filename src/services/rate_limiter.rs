use std::{fmt, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    cache::{CacheKeys, WindowStore},
    clock::Clock,
    config::LimitsConfig,
    models::PlanTier,
    observability::metrics,
};

/// What a sliding window is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// An authenticated credential
    Credential(Uuid),
    /// The caller's network address, when no credential is usable
    Address(String),
}

impl RateLimitKey {
    /// Credential when known, otherwise the address (or "unknown").
    pub fn derive(api_key_id: Option<Uuid>, address: Option<&str>) -> Self {
        match api_key_id {
            Some(id) => RateLimitKey::Credential(id),
            None => RateLimitKey::Address(address.unwrap_or("unknown").to_string()),
        }
    }

    fn window_key(&self) -> String {
        match self {
            RateLimitKey::Credential(id) => CacheKeys::credential_window(*id),
            RateLimitKey::Address(addr) => CacheKeys::address_window(addr),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::Credential(id) => write!(f, "key:{}", id),
            RateLimitKey::Address(addr) => write!(f, "addr:{}", addr),
        }
    }
}

/// Outcome of one sliding-window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Per-window cap. `None` when the tier is not counted.
    pub limit: Option<u32>,
    /// Requests left in the window after this one. `None` when not counted.
    pub remaining: Option<u32>,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: u64,
    /// The window store failed and the request was let through uncounted.
    pub degraded: bool,
}

/// Sliding-window request counter.
///
/// A request is allowed when fewer than `limit` records fall inside
/// `[now - window, now]`; allowed requests add a record at `now`.
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    config: LimitsConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>, config: LimitsConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.config.window_secs
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.window_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Check and, if allowed, record a request for `key`.
    ///
    /// `tier` is the owning account's plan for credential keys and `None` for
    /// address keys, which use the anonymous cap. Enterprise plans bypass
    /// counting entirely. If the window store is unreachable the request is
    /// allowed.
    pub async fn check(&self, key: &RateLimitKey, tier: Option<PlanTier>) -> RateLimitResult {
        let now = self.clock.now();
        let reset_at = now + Duration::seconds(self.config.window_secs as i64);
        let tier_label = tier.map(|t| t.as_str()).unwrap_or("anonymous");

        let limit = match tier {
            Some(tier) => self.config.limit_for(tier),
            None => Some(self.config.anonymous),
        };
        let Some(limit) = limit else {
            metrics::record_rate_limit("bypassed", tier_label);
            return RateLimitResult {
                allowed: true,
                limit: None,
                remaining: None,
                reset_at,
                retry_after_secs: self.config.window_secs,
                degraded: false,
            };
        };

        let check = self
            .store
            .check_and_record(
                &key.window_key(),
                now.timestamp_millis(),
                self.window_ms(),
                u64::from(limit),
            )
            .await;

        match check {
            Ok(check) => {
                let counted = if check.allowed {
                    check.count + 1
                } else {
                    check.count
                };
                let remaining = u64::from(limit).saturating_sub(counted) as u32;

                if check.allowed {
                    metrics::record_rate_limit("allowed", tier_label);
                } else {
                    metrics::record_rate_limit("limited", tier_label);
                    tracing::debug!(
                        key = %key,
                        limit,
                        count = check.count,
                        "Rate limit exceeded"
                    );
                }

                RateLimitResult {
                    allowed: check.allowed,
                    limit: Some(limit),
                    remaining: Some(remaining),
                    reset_at,
                    retry_after_secs: self.config.window_secs,
                    degraded: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Rate window store unavailable, allowing request"
                );
                metrics::record_rate_limit("degraded", tier_label);
                metrics::record_infrastructure_fault("window_store", "check_and_record");

                RateLimitResult {
                    allowed: true,
                    limit: Some(limit),
                    remaining: Some(limit),
                    reset_at,
                    retry_after_secs: self.config.window_secs,
                    degraded: true,
                }
            }
        }
    }

    /// Current count for `key` without recording.
    pub async fn peek(&self, key: &RateLimitKey) -> Option<u64> {
        self.store
            .count(
                &key.window_key(),
                self.clock.now_millis(),
                self.window_ms(),
            )
            .await
            .ok()
    }

    /// Purge every record that has left the window. Returns records removed.
    pub async fn sweep(&self) -> Result<u64, crate::cache::CacheError> {
        let cutoff = self.clock.now_millis() - self.window_ms();
        self.store.purge_expired(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use futures::future::join_all;
    use rstest::rstest;

    use super::*;
    use crate::{
        cache::{CacheError, CacheResult, MemoryCache, WindowCheck},
        clock::ManualClock,
        config::MemoryCacheConfig,
    };

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryCache::new(&MemoryCacheConfig::default()));
        (
            RateLimiter::new(store, clock.clone(), LimitsConfig::default()),
            clock,
        )
    }

    struct BrokenStore;

    #[async_trait]
    impl WindowStore for BrokenStore {
        async fn check_and_record(&self, _: &str, _: i64, _: i64, _: u64) -> CacheResult<WindowCheck> {
            Err(CacheError::Internal("connection refused".into()))
        }
        async fn count(&self, _: &str, _: i64, _: i64) -> CacheResult<u64> {
            Err(CacheError::Internal("connection refused".into()))
        }
        async fn purge(&self, _: &str, _: i64) -> CacheResult<u64> {
            Err(CacheError::Internal("connection refused".into()))
        }
        async fn purge_expired(&self, _: i64) -> CacheResult<u64> {
            Err(CacheError::Internal("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_free_tier_sixty_first_request_limited() {
        let (limiter, _) = limiter();
        let key = RateLimitKey::Credential(Uuid::new_v4());

        for i in 0..60u32 {
            let result = limiter.check(&key, Some(PlanTier::Free)).await;
            assert!(result.allowed, "request {} should be allowed", i + 1);
            assert_eq!(result.remaining, Some(59 - i));
        }

        let result = limiter.check(&key, Some(PlanTier::Free)).await;
        assert!(!result.allowed);
        assert_eq!(result.remaining, Some(0));
        assert_eq!(result.limit, Some(60));
        assert_eq!(result.retry_after_secs, 60);
        assert_eq!(result.reset_at, start() + Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_window_slides_open_again() {
        let (limiter, clock) = limiter();
        let key = RateLimitKey::Credential(Uuid::new_v4());
        for _ in 0..60 {
            limiter.check(&key, Some(PlanTier::Free)).await;
        }
        assert!(!limiter.check(&key, Some(PlanTier::Free)).await.allowed);

        clock.advance(Duration::milliseconds(60_001));
        let result = limiter.check(&key, Some(PlanTier::Free)).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, Some(59));
    }

    #[rstest]
    #[case(PlanTier::Basic, 600)]
    #[case(PlanTier::Professional, 6000)]
    #[tokio::test]
    async fn test_tier_limits(#[case] tier: PlanTier, #[case] limit: u32) {
        let (limiter, _) = limiter();
        let key = RateLimitKey::Credential(Uuid::new_v4());
        let result = limiter.check(&key, Some(tier)).await;
        assert_eq!(result.limit, Some(limit));
        assert_eq!(result.remaining, Some(limit - 1));
    }

    #[tokio::test]
    async fn test_enterprise_bypasses_counting() {
        let (limiter, _) = limiter();
        let key = RateLimitKey::Credential(Uuid::new_v4());
        for _ in 0..100 {
            let result = limiter.check(&key, Some(PlanTier::Enterprise)).await;
            assert!(result.allowed);
            assert_eq!(result.limit, None);
        }
        assert_eq!(limiter.peek(&key).await, Some(0));
    }

    #[tokio::test]
    async fn test_address_keys_use_anonymous_cap() {
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(MemoryCache::new(&MemoryCacheConfig::default()));
        let config = LimitsConfig {
            anonymous: 2,
            ..LimitsConfig::default()
        };
        let limiter = RateLimiter::new(store, clock, config);
        let key = RateLimitKey::derive(None, Some("203.0.113.9"));
        assert_eq!(key, RateLimitKey::Address("203.0.113.9".into()));

        assert!(limiter.check(&key, None).await.allowed);
        assert!(limiter.check(&key, None).await.allowed);
        assert!(!limiter.check(&key, None).await.allowed);

        // A different address has its own window
        let other = RateLimitKey::derive(None, Some("203.0.113.10"));
        assert!(limiter.check(&other, None).await.allowed);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = RateLimiter::new(Arc::new(BrokenStore), clock, LimitsConfig::default());
        let key = RateLimitKey::Credential(Uuid::new_v4());

        let result = limiter.check(&key, Some(PlanTier::Free)).await;
        assert!(result.allowed);
        assert!(result.degraded);
        assert!(limiter.sweep().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_respect_limit() {
        let (limiter, _) = limiter();
        let limiter = Arc::new(limiter);
        let key = RateLimitKey::Credential(Uuid::new_v4());

        let tasks = (0..100).map(|_| {
            let limiter = limiter.clone();
            let key = key.clone();
            tokio::spawn(async move { limiter.check(&key, Some(PlanTier::Free)).await.allowed })
        });
        let allowed = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(allowed, 60);
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_records() {
        let (limiter, clock) = limiter();
        let key = RateLimitKey::Credential(Uuid::new_v4());
        for _ in 0..5 {
            limiter.check(&key, Some(PlanTier::Free)).await;
        }
        clock.advance(Duration::seconds(61));
        assert_eq!(limiter.sweep().await.unwrap(), 5);
    }
}
