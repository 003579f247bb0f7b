//! listing-sync - push-driven sync pipeline for business listing data
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Webhook / broker push ingestion                          │
//! │  - Sync queue and cache control endpoints                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  SyncNotify (fire-and-forget)
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Sync Pipeline                           │
//! │  - Job queue (SQLite)                                       │
//! │  - Worker pool, per-type handlers, retry policy             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Cache                              │
//! │  - Redis tier + bounded in-process LRU tier                 │
//! │  - Invalidation orchestration and warming                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `ingest`: Notification authentication, parsing and dispatch
//! - `sync`: Job queue, worker, handlers and provider client
//! - `cache`: Two-tier read cache and invalidation
//! - `data`: Database layer
//! - `auth`: Internal API authentication
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like database pool, caches, and HTTP client.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Two-tier read cache
    pub cache: Arc<cache::CacheStore>,

    /// Domain invalidation over the read cache and rendered views
    pub orchestrator: Arc<cache::InvalidationOrchestrator>,

    /// Durable sync job queue
    pub queue: Arc<sync::SyncQueue>,

    /// Parsed notification dispatch
    pub processor: Arc<ingest::NotificationProcessor>,

    /// Per-client throttle for the notification endpoints
    pub rate_limiter: Arc<ingest::RateLimiter>,

    /// Listing provider API
    pub provider: Arc<dyn sync::ProviderApi>,

    /// HTTP client for provider and revalidation calls
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Initialize HTTP client and provider client
    /// 3. Initialize the read cache and its warmers
    /// 4. Wire queue, notification processor and rate limiter
    ///
    /// `notify` receives the sync requests produced by push notifications.
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(
        config: config::AppConfig,
        notify: Arc<dyn sync::SyncNotify>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        // 2. Initialize HTTP client
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("listing-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.provider.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;
        let provider: Arc<dyn sync::ProviderApi> = Arc::new(sync::GoogleBusinessClient::new(
            http_client.clone(),
            &config.provider,
        ));

        // 3. Initialize the read cache
        let cache = Arc::new(cache::CacheStore::new(
            Self::remote_cache(&config.redis),
            config.cache.fallback_capacity,
            cache::BucketTtls::from_config(&config.cache),
            config.redis.key_prefix.clone(),
            Arc::new(cache::CacheTelemetry::new()),
        ));
        cache::register_default_warmers(&cache, db.clone());

        let revalidator = Arc::new(cache::HttpRevalidator::new(
            http_client.clone(),
            &config.revalidation,
        ));
        let orchestrator = Arc::new(cache::InvalidationOrchestrator::new(
            cache.clone(),
            revalidator,
            config.revalidation.locales.clone(),
        ));
        tracing::info!(
            remote = config.redis.url.is_some(),
            capacity = config.cache.fallback_capacity,
            "Cache initialized"
        );

        // 4. Queue and ingestion
        let queue = Arc::new(sync::SyncQueue::new(db.clone(), config.worker.max_attempts));
        let processor = Arc::new(ingest::NotificationProcessor::new(db.clone(), notify));
        let rate_limiter = Arc::new(ingest::RateLimiter::new(
            config.webhook.rate_limit_max_requests,
            Duration::from_secs(config.webhook.rate_limit_window_secs.max(1)),
        ));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            cache,
            orchestrator,
            queue,
            processor,
            rate_limiter,
            provider,
            http_client,
        })
    }

    fn remote_cache(config: &config::RedisConfig) -> Option<Arc<dyn cache::RemoteCache>> {
        let url = config.url.as_deref().filter(|url| !url.trim().is_empty())?;
        match cache::RedisCache::new(url, Duration::from_millis(config.timeout_ms.max(1))) {
            Ok(redis) => Some(Arc::new(redis)),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid redis.url; using the in-process cache only");
                None
            }
        }
    }

    /// Sync worker wired to this state
    pub fn worker(&self) -> sync::SyncWorker {
        sync::SyncWorker::new(
            self.db.clone(),
            self.queue.clone(),
            self.provider.clone(),
            self.db.clone(),
        )
        .with_orchestrator(self.orchestrator.clone())
        .with_insights_days(self.config.provider.insights_days)
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware};
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    let internal = Router::new()
        .merge(api::sync_router())
        .merge(api::cache_router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_internal_auth,
        ));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::webhook_router(state.clone()))
        .nest("/api", internal)
        .layer(middleware::from_fn(api::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
