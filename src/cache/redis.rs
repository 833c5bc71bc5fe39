use std::time::Duration;

use async_trait::async_trait;
use redis::{
    ConnectionInfo, IntoConnectionInfo, aio::MultiplexedConnection, cluster::ClusterClient,
    cluster_async::ClusterConnection,
};
use uuid::Uuid;

use super::{
    error::{CacheError, CacheResult},
    traits::{WindowCheck, WindowStore},
};
use crate::config::RedisCacheConfig;

/// A wrapper enum for either a standalone or cluster Redis connection.
enum RedisConn {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// Macro to execute a Redis command on either connection type.
macro_rules! redis_cmd {
    ($conn:expr, $cmd:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $cmd.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $cmd.query_async(c).await,
        }
    };
}

/// Macro to execute a Redis script on either connection type.
macro_rules! redis_script {
    ($conn:expr, $script:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $script.invoke_async(c).await,
            RedisConn::Cluster(ref mut c) => $script.invoke_async(c).await,
        }
    };
}

/// Lua script for an atomic sliding-window check and record.
/// Returns [allowed (0/1), count_before]
///
/// Records are members of a sorted set scored by their millisecond timestamp.
/// The key expires one window after its newest record, so idle windows clean
/// themselves up.
const RATE_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
local count = redis.call('ZCOUNT', key, '-inf', now)

if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window)
    return {1, count}
else
    return {0, count}
end
"#;

/// Internal enum to hold either a standalone or cluster Redis client.
enum RedisConnection {
    Standalone(redis::Client),
    Cluster(ClusterClient),
}

/// Window store shared between gateway nodes.
pub struct RedisCache {
    connection: RedisConnection,
    key_prefix: String,
}

impl RedisCache {
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let connection = if let Some(cluster_config) = &config.cluster {
            // Cluster nodes are comma-separated: "redis://host1:6379,host2:6379"
            let nodes: Vec<ConnectionInfo> = config
                .url
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    let node_url = if s.starts_with("redis://") || s.starts_with("rediss://") {
                        s.to_string()
                    } else {
                        format!("redis://{}", s)
                    };
                    node_url.into_connection_info()
                })
                .collect::<Result<Vec<_>, _>>()?;

            if nodes.is_empty() {
                return Err(CacheError::Redis(redis::RedisError::from((
                    redis::ErrorKind::InvalidClientConfig,
                    "No cluster nodes specified in URL",
                ))));
            }

            let mut builder = redis::cluster::ClusterClientBuilder::new(nodes);
            if cluster_config.read_from_replicas {
                builder = builder.read_from_replicas();
            }
            builder = builder
                .retries(cluster_config.retries)
                .connection_timeout(Duration::from_secs(cluster_config.connection_timeout_secs))
                .response_timeout(Duration::from_secs(cluster_config.response_timeout_secs));

            RedisConnection::Cluster(builder.build()?)
        } else {
            RedisConnection::Standalone(redis::Client::open(config.url.as_str())?)
        };

        let cache = Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        };

        // Fail at startup rather than on the first request
        let connect = cache.get_connection();
        match tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), connect).await
        {
            Ok(conn) => {
                conn?;
            }
            Err(_) => {
                return Err(CacheError::Internal(format!(
                    "timed out connecting to Redis after {}s",
                    config.connect_timeout_secs
                )));
            }
        }

        tracing::info!(
            cluster = config.cluster.is_some(),
            prefix = %cache.key_prefix,
            "Connected to Redis window store"
        );
        Ok(cache)
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_connection(&self) -> CacheResult<RedisConn> {
        match &self.connection {
            RedisConnection::Standalone(client) => {
                let conn = client.get_multiplexed_async_connection().await?;
                Ok(RedisConn::Standalone(conn))
            }
            RedisConnection::Cluster(client) => {
                let conn = client.get_async_connection().await?;
                Ok(RedisConn::Cluster(conn))
            }
        }
    }
}

/// Sorted-set member for a record. Timestamps collide under load, so each
/// record gets a unique suffix.
fn record_member(now_ms: i64) -> String {
    format!("{}-{}", now_ms, Uuid::new_v4().simple())
}

#[async_trait]
impl WindowStore for RedisCache {
    async fn check_and_record(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> CacheResult<WindowCheck> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let result: Vec<i64> = redis_script!(
            conn,
            redis::Script::new(RATE_WINDOW_SCRIPT)
                .key(&full_key)
                .arg(now_ms)
                .arg(window_ms)
                .arg(limit)
                .arg(record_member(now_ms))
        )?;

        Ok(WindowCheck {
            allowed: result.first().copied().unwrap_or(0) == 1,
            count: result.get(1).copied().unwrap_or(0).max(0) as u64,
        })
    }

    async fn count(&self, key: &str, now_ms: i64, window_ms: i64) -> CacheResult<u64> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let count: u64 = redis_cmd!(
            conn,
            redis::cmd("ZCOUNT")
                .arg(&full_key)
                .arg(now_ms - window_ms)
                .arg(now_ms)
        )?;
        Ok(count)
    }

    async fn purge(&self, key: &str, before_ms: i64) -> CacheResult<u64> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let removed: u64 = redis_cmd!(
            conn,
            redis::cmd("ZREMRANGEBYSCORE")
                .arg(&full_key)
                .arg("-inf")
                .arg(format!("({}", before_ms))
        )?;
        Ok(removed)
    }

    async fn purge_expired(&self, _before_ms: i64) -> CacheResult<u64> {
        // Keys carry a PEXPIRE of one window, so Redis reclaims idle windows itself
        Ok(0)
    }
}
