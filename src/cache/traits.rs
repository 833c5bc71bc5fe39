use async_trait::async_trait;

use super::error::CacheResult;

/// Result of an atomic check-and-record on one sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCheck {
    /// Whether a record was inserted for this request
    pub allowed: bool,
    /// Records inside the window before this request
    pub count: u64,
}

/// Storage for rate window records.
///
/// A window for `key` at time `now` is the set of records with timestamps in
/// `[now - window, now]`. Timestamps are milliseconds since the epoch and are
/// always supplied by the caller, never read from the store's own clock.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Count the window and, if the count is below `limit`, insert a record at
    /// `now_ms`. Records older than the window are trimmed for `key` on the way.
    async fn check_and_record(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> CacheResult<WindowCheck>;

    /// Count records inside the window without recording.
    async fn count(&self, key: &str, now_ms: i64, window_ms: i64) -> CacheResult<u64>;

    /// Drop records for `key` older than `before_ms`. Returns records removed.
    async fn purge(&self, key: &str, before_ms: i64) -> CacheResult<u64>;

    /// Drop every record older than `before_ms`. Returns records removed.
    async fn purge_expired(&self, before_ms: i64) -> CacheResult<u64>;
}
