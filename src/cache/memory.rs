use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    error::{CacheError, CacheResult},
    traits::{WindowCheck, WindowStore},
};
use crate::config::MemoryCacheConfig;

/// Process-local window store.
///
/// Each key holds its record timestamps in ascending order. The check and the
/// insert for one key happen under that key's shard lock, so concurrent
/// requests on one credential never race past the limit on a single node.
///
/// For multi-node deployments, use the Redis store; windows here are not
/// shared between processes.
pub struct MemoryCache {
    windows: DashMap<String, VecDeque<i64>>,
    max_keys: usize,
}

impl MemoryCache {
    pub fn new(config: &MemoryCacheConfig) -> Self {
        Self {
            windows: DashMap::new(),
            max_keys: config.max_keys.max(1),
        }
    }

    /// Number of keys currently holding records.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    fn make_room(&self, key: &str, cutoff: i64) -> CacheResult<()> {
        if self.windows.contains_key(key) || self.windows.len() < self.max_keys {
            return Ok(());
        }

        self.windows.retain(|_, window| {
            trim(window, cutoff);
            !window.is_empty()
        });

        if self.windows.len() >= self.max_keys {
            return Err(CacheError::CapacityExceeded(self.max_keys));
        }
        Ok(())
    }
}

fn trim(window: &mut VecDeque<i64>, cutoff: i64) -> u64 {
    let mut removed = 0;
    while window.front().is_some_and(|&ts| ts < cutoff) {
        window.pop_front();
        removed += 1;
    }
    removed
}

fn in_window(window: &VecDeque<i64>, now_ms: i64) -> u64 {
    window.partition_point(|&ts| ts <= now_ms) as u64
}

#[async_trait]
impl WindowStore for MemoryCache {
    async fn check_and_record(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> CacheResult<WindowCheck> {
        let cutoff = now_ms - window_ms;
        self.make_room(key, cutoff)?;

        let mut entry = self.windows.entry(key.to_string()).or_default();
        let window = entry.value_mut();
        trim(window, cutoff);

        let count = in_window(window, now_ms);
        if count >= limit {
            return Ok(WindowCheck {
                allowed: false,
                count,
            });
        }

        // Keep ascending order even if callers' clocks interleave
        let pos = window.partition_point(|&ts| ts <= now_ms);
        window.insert(pos, now_ms);

        Ok(WindowCheck {
            allowed: true,
            count,
        })
    }

    async fn count(&self, key: &str, now_ms: i64, window_ms: i64) -> CacheResult<u64> {
        let cutoff = now_ms - window_ms;
        Ok(self
            .windows
            .get(key)
            .map(|window| {
                window
                    .iter()
                    .filter(|&&ts| ts >= cutoff && ts <= now_ms)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn purge(&self, key: &str, before_ms: i64) -> CacheResult<u64> {
        let removed = match self.windows.get_mut(key) {
            Some(mut window) => trim(window.value_mut(), before_ms),
            None => return Ok(0),
        };
        self.windows.remove_if(key, |_, window| window.is_empty());
        Ok(removed)
    }

    async fn purge_expired(&self, before_ms: i64) -> CacheResult<u64> {
        let mut removed = 0;
        self.windows.retain(|_, window| {
            removed += trim(window, before_ms);
            !window.is_empty()
        });
        Ok(removed)
    }
}
