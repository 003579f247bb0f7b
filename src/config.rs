//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub provider: ProviderConfig,
    pub webhook: WebhookConfig,
    pub cache: CacheConfig,
    pub worker: WorkerConfig,
    pub revalidation: RevalidationConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Shared cache tier
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis URL; the in-process fallback tier is used alone when unset
    pub url: Option<String>,
    /// Key namespace prefix
    pub key_prefix: String,
    /// Per-command timeout in milliseconds
    pub timeout_ms: u64,
}

/// External listing provider API
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Account management API (accounts, locations)
    pub account_api_base_url: String,
    /// Business information API (reviews, questions, posts, media)
    pub business_api_base_url: String,
    /// Performance API (daily metrics)
    pub performance_api_base_url: String,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Number of trailing days fetched by insight syncs
    pub insights_days: i64,
    /// Page size requested from paginated endpoints
    pub page_size: u32,
}

/// Inbound push notification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// HMAC-SHA256 secret for the direct webhook transport
    pub secret: String,
    /// Token echoed back during endpoint verification
    pub verify_token: String,
    /// Shared secret expected in the broker push `token` query parameter
    pub pubsub_token: String,
    /// Maximum accepted body size in bytes
    pub max_body_bytes: usize,
    /// Requests allowed per source IP per window
    pub rate_limit_max_requests: u32,
    /// Rate limit window in seconds
    pub rate_limit_window_secs: u64,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries held by the in-process fallback tier (default: 1000)
    pub fallback_capacity: usize,
    /// Dashboard overview TTL in seconds (default: 300)
    pub dashboard_overview_ttl: u64,
    /// Locations TTL in seconds (default: 600)
    pub locations_ttl: u64,
    /// Reviews TTL in seconds (default: 300)
    pub reviews_ttl: u64,
    /// Questions TTL in seconds (default: 300)
    pub questions_ttl: u64,
    /// Hits since the last sweep that make an entry a warm candidate
    pub warm_threshold: u64,
    /// Popularity sweep interval in seconds (default: 300)
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Sync worker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Enable the background job consumers
    pub enabled: bool,
    /// Number of concurrent job consumers
    pub concurrency: usize,
    /// Idle poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Attempts granted to newly enqueued jobs
    pub max_attempts: i64,
}

/// Rendered view revalidation
#[derive(Debug, Clone, Deserialize)]
pub struct RevalidationConfig {
    /// Endpoint accepting `{path, secret}`; revalidation is skipped when unset
    pub endpoint: Option<String>,
    /// Secret forwarded with every revalidation request
    pub secret: Option<String>,
    /// Locales every view path is revalidated for
    pub locales: Vec<String>,
}

/// Internal API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Bearer token required by the sync, queue and cache endpoints
    pub internal_token: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (LISTING_SYNC__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.path", "data/listing-sync.db")?
            .set_default("redis.key_prefix", "listing-sync")?
            .set_default("redis.timeout_ms", 250)?
            .set_default(
                "provider.account_api_base_url",
                "https://mybusinessaccountmanagement.googleapis.com/v1",
            )?
            .set_default(
                "provider.business_api_base_url",
                "https://mybusiness.googleapis.com/v4",
            )?
            .set_default(
                "provider.performance_api_base_url",
                "https://businessprofileperformance.googleapis.com/v1",
            )?
            .set_default("provider.request_timeout_secs", 30)?
            .set_default("provider.insights_days", 30)?
            .set_default("provider.page_size", 50)?
            .set_default("webhook.max_body_bytes", 1_048_576)?
            .set_default("webhook.rate_limit_max_requests", 100)?
            .set_default("webhook.rate_limit_window_secs", 60)?
            .set_default("cache.fallback_capacity", 1000)?
            .set_default("cache.dashboard_overview_ttl", 300)?
            .set_default("cache.locations_ttl", 600)?
            .set_default("cache.reviews_ttl", 300)?
            .set_default("cache.questions_ttl", 300)?
            .set_default("cache.warm_threshold", 3)?
            .set_default("cache.sweep_interval_secs", 300)?
            .set_default("worker.enabled", true)?
            .set_default("worker.concurrency", 4)?
            .set_default("worker.poll_interval_ms", 1000)?
            .set_default("worker.max_attempts", 3)?
            .set_default("revalidation.locales", vec!["en", "ar"])?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("LISTING_SYNC")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("revalidation.locales")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_WEBHOOK_SECRET_BYTES: usize = 16;

        if self.webhook.secret.as_bytes().len() < MIN_WEBHOOK_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "webhook.secret must be at least {} bytes",
                MIN_WEBHOOK_SECRET_BYTES
            )));
        }

        for (key, value) in [
            ("webhook.verify_token", &self.webhook.verify_token),
            ("webhook.pubsub_token", &self.webhook.pubsub_token),
            ("api.internal_token", &self.api.internal_token),
        ] {
            if value.trim().is_empty() {
                return Err(crate::error::AppError::Config(format!(
                    "{key} must not be empty"
                )));
            }
        }

        if self.cache.fallback_capacity == 0 {
            return Err(crate::error::AppError::Config(
                "cache.fallback_capacity must be greater than 0".to_string(),
            ));
        }

        if self.worker.concurrency == 0 {
            return Err(crate::error::AppError::Config(
                "worker.concurrency must be greater than 0".to_string(),
            ));
        }

        if self.worker.max_attempts <= 0 {
            return Err(crate::error::AppError::Config(
                "worker.max_attempts must be greater than 0".to_string(),
            ));
        }

        if let Some(endpoint) = &self.revalidation.endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                crate::error::AppError::Config(format!(
                    "revalidation.endpoint is not a valid URL: {e}"
                ))
            })?;
        }

        if self.webhook.rate_limit_window_secs == 0 {
            tracing::warn!("webhook.rate_limit_window_secs=0 is invalid; clamped to 1 second");
        }

        Ok(())
    }
}
