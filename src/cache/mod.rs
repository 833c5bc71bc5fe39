mod error;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{CacheError, CacheResult};
pub use keys::CacheKeys;
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use traits::{WindowCheck, WindowStore};

use crate::config::CacheConfig;

/// Build the configured window store.
pub async fn from_config(config: &CacheConfig) -> CacheResult<Arc<dyn WindowStore>> {
    match config {
        CacheConfig::Memory(memory) => Ok(Arc::new(MemoryCache::new(memory))),
        #[cfg(feature = "redis")]
        CacheConfig::Redis(redis) => Ok(Arc::new(RedisCache::from_config(redis).await?)),
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis(_) => Err(CacheError::Internal(
            "cache type 'redis' requires the 'redis' feature".into(),
        )),
    }
}
