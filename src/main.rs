//! listing-sync binary entry point

use listing_sync::sync::{SyncTrigger, WorkerRunner, run_trigger_pump};
use listing_sync::{AppState, config};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState and the sync trigger channel
/// 4. Start background tasks (trigger pump, workers, cache sweep, rate limit pruning)
/// 5. Build Axum router and start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("LISTING_SYNC__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let log_level =
        std::env::var("LISTING_SYNC__LOGGING__LEVEL").unwrap_or_else(|_| "info".to_string());
    let default_filter = format!("listing_sync={log_level},tower_http=debug");

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.clone().into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.clone().into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting listing-sync...");

    // 2. Initialize metrics
    listing_sync::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        worker_enabled = config.worker.enabled,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let (trigger, requests) = SyncTrigger::channel();
    let state = AppState::new(config.clone(), Arc::new(trigger)).await?;

    // 5. Start background tasks
    tokio::spawn(run_trigger_pump(requests, state.queue.clone()));
    if config.worker.enabled {
        let runner = Arc::new(WorkerRunner::new(Arc::new(state.worker()), &config.worker));
        runner.spawn();
    }
    spawn_cache_sweep_task(state.clone());
    spawn_rate_limit_prune_task(state.clone());

    // 6. Build Axum router
    let app = listing_sync::build_router(state.clone());

    // 7. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Spawn the popularity sweep that warms hot cache entries
fn spawn_cache_sweep_task(state: AppState) {
    tokio::spawn(async move {
        let threshold = state.config.cache.warm_threshold.max(1);
        let mut interval = tokio::time::interval(state.config.cache.sweep_interval());

        // Consume the immediate first tick so the first sweep sees a full window.
        interval.tick().await;

        loop {
            interval.tick().await;

            let warmed = state.cache.sweep_popular(threshold).await;
            tracing::debug!(warmed, threshold, "Cache popularity sweep finished");
        }
    });

    tracing::info!("Cache sweep task spawned");
}

/// Spawn periodic pruning of closed rate limit windows
fn spawn_rate_limit_prune_task(state: AppState) {
    tokio::spawn(async move {
        let window = state.config.webhook.rate_limit_window_secs.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(window));

        loop {
            interval.tick().await;
            state.rate_limiter.prune_old().await;
        }
    });

    tracing::info!("Rate limit prune task spawned");
}
