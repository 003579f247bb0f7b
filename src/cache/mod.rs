//! Read cache
//!
//! Two-tier bucketed cache for dashboard read models:
//! - Shared Redis tier (optional)
//! - Bounded in-process LRU fallback tier
//! - Hit/miss and popularity telemetry with periodic warming
//! - Domain invalidation with view revalidation

mod bucket;
mod fallback;
mod invalidation;
mod remote;
mod revalidate;
mod store;
mod telemetry;
mod warmers;

pub use bucket::{BucketTtls, CacheBucket};
pub use fallback::FallbackCache;
pub use invalidation::{InvalidationOrchestrator, InvalidationReport, InvalidationScope};
pub use remote::{RedisCache, RemoteCache, RemoteCacheError, RemoteEntry};
pub use revalidate::{HttpRevalidator, PathRevalidator};
pub use store::{CacheStats, CacheStore, Warmer, warmer};
pub use telemetry::{CacheTelemetry, HitMiss, TelemetrySnapshot};
pub use warmers::register_default_warmers;
