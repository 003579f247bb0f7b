//! Shared cache tier
//!
//! Redis-backed store shared by every process. Callers treat every error as
//! a soft failure and fall back to the in-process tier.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum RemoteCacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis command timed out after {0:?}")]
    Timeout(Duration),
}

/// A value read from the shared tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub value: String,
    /// Time left before the shared copy expires; `None` when it has no expiry
    pub ttl: Option<Duration>,
}

impl RemoteEntry {
    pub fn new(value: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            ttl,
        }
    }
}

/// Key/value operations the cache store needs from the shared tier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, RemoteCacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RemoteCacheError>;

    async fn delete(&self, key: &str) -> Result<(), RemoteCacheError>;
}

/// Redis implementation of [`RemoteCache`]
pub struct RedisCache {
    client: redis::Client,
    timeout: Duration,
}

impl RedisCache {
    /// Create a client for `url`
    ///
    /// No connection is made until the first command.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RemoteCacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client, timeout })
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T, RemoteCacheError>
    where
        F: FnOnce(redis::aio::MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let fut = async {
            let conn = self.client.get_multiplexed_async_connection().await?;
            op(conn).await
        };

        match timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(RemoteCacheError::from),
            Err(_) => Err(RemoteCacheError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl RemoteCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, RemoteCacheError> {
        let key = key.to_string();
        let (value, pttl) = self
            .run(|mut conn| async move {
                redis::pipe()
                    .atomic()
                    .get(&key)
                    .cmd("PTTL")
                    .arg(&key)
                    .query_async::<_, (Option<String>, i64)>(&mut conn)
                    .await
            })
            .await?;

        Ok(value.map(|value| RemoteEntry {
            value,
            ttl: remaining_ttl(pttl),
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RemoteCacheError> {
        let key = key.to_string();
        let value = value.to_string();
        let seconds = ttl.as_secs().max(1);
        self.run(|mut conn| async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(seconds)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteCacheError> {
        let key = key.to_string();
        self.run(|mut conn| async move { conn.del::<_, ()>(key).await })
            .await
    }
}

/// Interpret a `PTTL` reply
///
/// Negative replies mean no expiry (-1) or a missing key (-2).
fn remaining_ttl(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pttl_replies_map_to_remaining_ttl() {
        assert_eq!(remaining_ttl(1500), Some(Duration::from_millis(1500)));
        assert_eq!(remaining_ttl(0), Some(Duration::ZERO));
        assert_eq!(remaining_ttl(-1), None);
        assert_eq!(remaining_ttl(-2), None);
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisCache::new("not a url", Duration::from_millis(50)).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_surfaces_as_error() {
        let cache = RedisCache::new("redis://127.0.0.1:1/", Duration::from_millis(200)).unwrap();
        assert!(cache.get("listing-sync:reviews:user-1").await.is_err());
    }
}
