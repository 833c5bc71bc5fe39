use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Window store is full ({0} keys)")]
    CapacityExceeded(usize),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
