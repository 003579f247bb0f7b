//! Two-tier cache store
//!
//! Reads go to the shared tier first. A shared hit refreshes the local
//! mirror for no longer than the shared copy has left, a shared miss is final, and a shared error falls through to the
//! in-process tier. Writes go to both tiers.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::bucket::{BucketTtls, CacheBucket};
use super::fallback::FallbackCache;
use super::remote::RemoteCache;
use super::telemetry::{CacheTelemetry, TelemetrySnapshot};
use crate::metrics::{CACHE_SIZE, CACHE_WARMS_TOTAL};

/// Produces a fresh value for one id of a bucket; `None` means nothing to cache
pub type Warmer = Arc<
    dyn Fn(String) -> BoxFuture<'static, anyhow::Result<Option<serde_json::Value>>> + Send + Sync,
>;

/// Wrap an async closure as a [`Warmer`]
pub fn warmer<F, Fut>(produce: F) -> Warmer
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<serde_json::Value>>> + Send + 'static,
{
    Arc::new(move |id| produce(id).boxed())
}

/// Cache store statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    #[serde(flatten)]
    pub telemetry: TelemetrySnapshot,
    pub fallback_entries: usize,
    pub fallback_capacity: usize,
    pub remote_enabled: bool,
}

pub struct CacheStore {
    remote: Option<Arc<dyn RemoteCache>>,
    fallback: FallbackCache,
    telemetry: Arc<CacheTelemetry>,
    ttls: BucketTtls,
    key_prefix: String,
    warmers: RwLock<HashMap<CacheBucket, Warmer>>,
}

impl CacheStore {
    /// Create a cache store
    ///
    /// # Arguments
    /// * `remote` - Shared tier; `None` runs on the in-process tier alone
    /// * `fallback_capacity` - Maximum entries in the in-process tier
    /// * `ttls` - Default TTL per bucket
    /// * `key_prefix` - Namespace for shared tier keys
    /// * `telemetry` - Counter sink
    pub fn new(
        remote: Option<Arc<dyn RemoteCache>>,
        fallback_capacity: usize,
        ttls: BucketTtls,
        key_prefix: impl Into<String>,
        telemetry: Arc<CacheTelemetry>,
    ) -> Self {
        Self {
            remote,
            fallback: FallbackCache::new(fallback_capacity),
            telemetry,
            ttls,
            key_prefix: key_prefix.into(),
            warmers: RwLock::new(HashMap::new()),
        }
    }

    fn key(&self, bucket: CacheBucket, id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, bucket.as_str(), id)
    }

    pub fn telemetry(&self) -> &Arc<CacheTelemetry> {
        &self.telemetry
    }

    fn update_size_gauge(&self) {
        CACHE_SIZE
            .with_label_values(&["fallback"])
            .set(self.fallback.len() as i64);
    }

    /// Read a serialized value
    pub async fn get_raw(&self, bucket: CacheBucket, id: &str) -> Option<String> {
        let key = self.key(bucket, id);

        let value = match &self.remote {
            Some(remote) => match remote.get(&key).await {
                Ok(Some(entry)) => {
                    let ttl = mirror_ttl(entry.ttl, self.ttls.ttl(bucket));
                    self.fallback.set(&key, entry.value.clone(), ttl);
                    Some(entry.value)
                }
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "Shared cache read failed, using fallback tier");
                    self.fallback.get(&key)
                }
            },
            None => self.fallback.get(&key),
        };

        match &value {
            Some(_) => self.telemetry.record_hit(bucket, id),
            None => self.telemetry.record_miss(bucket),
        }

        value
    }

    /// Read and deserialize a value
    ///
    /// A value that no longer deserializes into `T` counts as a miss.
    pub async fn get<T: DeserializeOwned>(&self, bucket: CacheBucket, id: &str) -> Option<T> {
        let raw = self.get_raw(bucket, id).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(bucket = %bucket, id, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Write a serialized value to both tiers
    pub async fn set_raw(&self, bucket: CacheBucket, id: &str, value: String, ttl: Option<Duration>) {
        let key = self.key(bucket, id);
        let ttl = ttl.unwrap_or_else(|| self.ttls.ttl(bucket));

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set(&key, &value, ttl).await {
                tracing::debug!(key = %key, error = %e, "Shared cache write failed");
            }
        }

        if let Some(evicted) = self.fallback.set(&key, value, ttl) {
            tracing::trace!(evicted = %evicted, "Fallback cache evicted LRU entry");
        }
        self.update_size_gauge();
    }

    /// Serialize and write a value to both tiers
    ///
    /// `ttl` overrides the bucket default.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        bucket: CacheBucket,
        id: &str,
        value: &T,
        ttl: Option<Duration>,
    ) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(bucket, id, raw, ttl).await,
            Err(e) => {
                tracing::warn!(bucket = %bucket, id, error = %e, "Failed to serialize cache value");
            }
        }
    }

    /// Remove a value from both tiers
    pub async fn invalidate(&self, bucket: CacheBucket, id: &str) {
        let key = self.key(bucket, id);

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(&key).await {
                tracing::debug!(key = %key, error = %e, "Shared cache delete failed");
            }
        }

        self.fallback.remove(&key);
        self.update_size_gauge();
        tracing::debug!(bucket = %bucket, id, "Invalidated cache entry");
    }

    /// Install the producer used by [`CacheStore::warm`] for a bucket
    pub fn register_warmer(&self, bucket: CacheBucket, warmer: Warmer) {
        let mut warmers = self
            .warmers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        warmers.insert(bucket, warmer);
    }

    fn warmer_for(&self, bucket: CacheBucket) -> Option<Warmer> {
        self.warmers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&bucket)
            .cloned()
    }

    /// Recompute and store a value through the bucket's warmer
    ///
    /// # Returns
    /// `true` if a value was written. Buckets without a warmer and warmers
    /// returning `None` leave the cache untouched.
    pub async fn warm(&self, bucket: CacheBucket, id: &str) -> anyhow::Result<bool> {
        let Some(warmer) = self.warmer_for(bucket) else {
            tracing::trace!(bucket = %bucket, "No warmer registered");
            return Ok(false);
        };

        match warmer(id.to_string()).await {
            Ok(Some(value)) => {
                self.set(bucket, id, &value, None).await;
                CACHE_WARMS_TOTAL
                    .with_label_values(&[bucket.as_str(), "stored"])
                    .inc();
                Ok(true)
            }
            Ok(None) => {
                CACHE_WARMS_TOTAL
                    .with_label_values(&[bucket.as_str(), "empty"])
                    .inc();
                Ok(false)
            }
            Err(e) => {
                CACHE_WARMS_TOTAL
                    .with_label_values(&[bucket.as_str(), "error"])
                    .inc();
                Err(e)
            }
        }
    }

    /// Warm every entry hit at least `threshold` times since the last sweep
    ///
    /// Every popularity counter is reset, so only hits since the previous
    /// sweep count. Warm failures are logged and do not stop the sweep.
    ///
    /// # Returns
    /// Number of entries written
    pub async fn sweep_popular(&self, threshold: u64) -> usize {
        let candidates = self.telemetry.take_popular(threshold);
        if candidates.is_empty() {
            return 0;
        }

        tracing::debug!(count = candidates.len(), "Warming popular cache entries");

        let results = futures::future::join_all(
            candidates
                .iter()
                .map(|(bucket, id)| async move { (bucket, id, self.warm(*bucket, id).await) }),
        )
        .await;

        let mut warmed = 0;
        for (bucket, id, result) in results {
            match result {
                Ok(true) => warmed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(bucket = %bucket, id = %id, error = %e, "Cache warm failed");
                }
            }
        }
        warmed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            telemetry: self.telemetry.snapshot(),
            fallback_entries: self.fallback.len(),
            fallback_capacity: self.fallback.capacity(),
            remote_enabled: self.remote.is_some(),
        }
    }
}

/// TTL for the local mirror of a shared hit, capped at the bucket TTL
fn mirror_ttl(remaining: Option<Duration>, bucket_ttl: Duration) -> Duration {
    remaining.map_or(bucket_ttl, |remaining| remaining.min(bucket_ttl))
}
