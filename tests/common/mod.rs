//! Common test utilities for E2E tests

#![allow(dead_code)]

use chrono::Utc;
use listing_sync::data::{Account, Location};
use listing_sync::sync::{EnqueueOutcome, SyncRequest, SyncTrigger};
use listing_sync::{AppState, config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

pub const WEBHOOK_SECRET: &str = "webhook-secret-0123456789";
pub const VERIFY_TOKEN: &str = "verify-me";
pub const PUBSUB_TOKEN: &str = "pubsub-token";
pub const INTERNAL_TOKEN: &str = "internal-token";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub requests: UnboundedReceiver<SyncRequest>,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

/// Configuration used by [`TestServer::new`]
pub fn test_config(db_path: PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
        },
        database: config::DatabaseConfig { path: db_path },
        redis: config::RedisConfig {
            url: None,
            key_prefix: "listing-sync-test".to_string(),
            timeout_ms: 100,
        },
        provider: config::ProviderConfig {
            account_api_base_url: "http://127.0.0.1:9/accounts".to_string(),
            business_api_base_url: "http://127.0.0.1:9/business".to_string(),
            performance_api_base_url: "http://127.0.0.1:9/performance".to_string(),
            request_timeout_secs: 5,
            insights_days: 30,
            page_size: 50,
        },
        webhook: config::WebhookConfig {
            secret: WEBHOOK_SECRET.to_string(),
            verify_token: VERIFY_TOKEN.to_string(),
            pubsub_token: PUBSUB_TOKEN.to_string(),
            max_body_bytes: 64 * 1024,
            rate_limit_max_requests: 100,
            rate_limit_window_secs: 60,
        },
        cache: config::CacheConfig {
            fallback_capacity: 1000,
            dashboard_overview_ttl: 300,
            locations_ttl: 600,
            reviews_ttl: 300,
            questions_ttl: 300,
            warm_threshold: 3,
            sweep_interval_secs: 300,
        },
        worker: config::WorkerConfig {
            enabled: false,
            concurrency: 1,
            poll_interval_ms: 50,
            max_attempts: 3,
        },
        revalidation: config::RevalidationConfig {
            endpoint: None,
            secret: None,
            locales: vec!["en".to_string(), "ar".to_string()],
        },
        api: config::ApiConfig {
            internal_token: INTERNAL_TOKEN.to_string(),
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default test configuration
    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        listing_sync::metrics::init_metrics();

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path().join("test.db"));
        adjust(&mut config);

        // Requests stay in the channel so tests can inspect them
        let (trigger, requests) = SyncTrigger::channel();
        let state = AppState::new(config, Arc::new(trigger)).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = listing_sync::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            requests,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Sync requests emitted so far
    pub fn take_requests(&mut self) -> Vec<SyncRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            requests.push(request);
        }
        requests
    }

    /// Enqueue every pending sync request, as the trigger pump does
    pub async fn pump_requests(&mut self) -> Vec<EnqueueOutcome> {
        let mut outcomes = Vec::new();
        for request in self.take_requests() {
            outcomes.extend(self.state.queue.enqueue_request(&request).await.unwrap());
        }
        outcomes
    }

    /// Create a provider account in the database
    pub async fn create_account(&self, id: &str, user_id: &str, active: bool) -> Account {
        let now = Utc::now();
        let account = Account {
            id: id.to_string(),
            user_id: user_id.to_string(),
            name: format!("Business {id}"),
            provider_account_name: format!("accounts/{id}"),
            access_token: Some("test-access-token".to_string()),
            is_active: active,
            created_at: now,
            updated_at: now,
        };
        self.state.db.upsert_account(&account).await.unwrap();
        account
    }

    /// Create a location under `account` with provider id `provider_location`
    pub async fn create_location(
        &self,
        id: &str,
        account: &Account,
        provider_location: &str,
    ) -> Location {
        let now = Utc::now();
        let location = Location {
            id: id.to_string(),
            account_id: account.id.clone(),
            user_id: account.user_id.clone(),
            resource_name: format!(
                "{}/locations/{}",
                account.provider_account_name, provider_location
            ),
            title: format!("Location {provider_location}"),
            address: None,
            phone: None,
            website: None,
            verification_state: None,
            is_active: true,
            created_at: now,
            updated_at: now,
            synced_at: None,
        };
        self.state.db.upsert_location(&location).await.unwrap();
        location
    }

    /// POST a signed direct webhook
    pub async fn post_signed_webhook(&self, body: &str) -> reqwest::Response {
        let signature = listing_sync::ingest::sign_body(WEBHOOK_SECRET, body.as_bytes()).unwrap();
        self.client
            .post(self.url("/api/webhooks/gmb"))
            .header("content-type", "application/json")
            .header("x-webhook-signature", format!("sha256={signature}"))
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    /// Request builder carrying the internal bearer token
    pub fn internal(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(INTERNAL_TOKEN)
    }
}
