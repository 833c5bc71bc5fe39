use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Storage for rate window records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CacheConfig {
    /// Process-local windows. Single node only; lost on restart.
    Memory(MemoryCacheConfig),

    /// Shared windows in Redis. Required when several gateway nodes front
    /// the same credentials.
    Redis(RedisCacheConfig),
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Memory(MemoryCacheConfig::default())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CacheConfig::Memory(c) => c.validate(),
            CacheConfig::Redis(c) => c.validate(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            CacheConfig::Memory(_) => "memory",
            CacheConfig::Redis(_) => "redis",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCacheConfig {
    /// Maximum number of distinct window keys held at once.
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_keys: default_max_keys(),
        }
    }
}

impl MemoryCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_keys == 0 {
            return Err(ConfigError::Validation(
                "Memory cache max_keys must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_keys() -> usize {
    100_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisCacheConfig {
    /// Redis connection URL.
    /// Format: redis://[user:password@]host:port[/database]
    /// For clusters: redis://host1:port1,host2:port2,...
    pub url: String,

    #[serde(default = "default_redis_timeout")]
    pub connect_timeout_secs: u64,

    /// Prefix for every window key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Cluster mode configuration.
    #[serde(default)]
    pub cluster: Option<RedisClusterConfig>,
}

impl RedisCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisClusterConfig {
    #[serde(default)]
    pub read_from_replicas: bool,

    #[serde(default = "default_cluster_retries")]
    pub retries: u32,

    #[serde(default = "default_cluster_connection_timeout")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_cluster_response_timeout")]
    pub response_timeout_secs: u64,
}

fn default_redis_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "tg:".to_string()
}

fn default_cluster_retries() -> u32 {
    3
}

fn default_cluster_connection_timeout() -> u64 {
    5
}

fn default_cluster_response_timeout() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_memory() {
        assert!(matches!(CacheConfig::default(), CacheConfig::Memory(_)));
    }

    #[test]
    fn test_parse_redis_cluster() {
        let config: CacheConfig = toml::from_str(
            r#"
            type = "redis"
            url = "redis://node1:6379,node2:6379"
            [cluster]
            read_from_replicas = true
        "#,
        )
        .unwrap();

        match config {
            CacheConfig::Redis(redis) => {
                assert_eq!(redis.key_prefix, "tg:");
                let cluster = redis.cluster.unwrap();
                assert!(cluster.read_from_replicas);
                assert_eq!(cluster.retries, 3);
            }
            other => panic!("expected redis, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_redis_url_rejected() {
        let config = CacheConfig::Redis(RedisCacheConfig {
            url: String::new(),
            connect_timeout_secs: 5,
            key_prefix: "tg:".into(),
            cluster: None,
        });
        assert!(config.validate().is_err());
    }
}
