//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.
//! Cache hit rates reported by the cache store itself live in
//! [`crate::cache::CacheTelemetry`]; the counters here are the exported view.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Ingestion Metrics
    pub static ref NOTIFICATIONS_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_notifications_received_total", "Total number of push notifications received"),
        &["transport", "outcome"]
    ).expect("metric can be created");
    pub static ref NOTIFICATION_KINDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_notification_kinds_total", "Notification type tags seen by the gateway"),
        &["kind"]
    ).expect("metric can be created");

    // Sync Metrics
    pub static ref SYNC_JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_jobs_total", "Total number of sync jobs processed"),
        &["job_type", "status"]
    ).expect("metric can be created");
    pub static ref SYNC_JOB_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "listing_sync_job_duration_seconds",
            "Sync job duration in seconds"
        ).buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["job_type"]
    ).expect("metric can be created");
    pub static ref SYNC_ITEMS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_items_total", "Total number of entities upserted by sync jobs"),
        &["job_type"]
    ).expect("metric can be created");
    pub static ref PROVIDER_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_provider_requests_total", "Provider API attempts by outcome"),
        &["operation", "outcome"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_cache_hits_total", "Total number of cache hits"),
        &["bucket"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_cache_misses_total", "Total number of cache misses"),
        &["bucket"]
    ).expect("metric can be created");
    pub static ref CACHE_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("listing_sync_cache_size", "Current number of items in the fallback cache tier"),
        &["tier"]
    ).expect("metric can be created");
    pub static ref CACHE_WARMS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_cache_warms_total", "Cache warm attempts by outcome"),
        &["bucket", "status"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("listing_sync_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Safe to call more than once; registration happens on the first call.
pub fn init_metrics() {
    INIT.call_once(register_all);
}

static INIT: Once = Once::new();

fn register_all() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(NOTIFICATIONS_RECEIVED_TOTAL.clone()))
        .expect("NOTIFICATIONS_RECEIVED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(NOTIFICATION_KINDS_TOTAL.clone()))
        .expect("NOTIFICATION_KINDS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SYNC_JOBS_TOTAL.clone()))
        .expect("SYNC_JOBS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SYNC_JOB_DURATION_SECONDS.clone()))
        .expect("SYNC_JOB_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(SYNC_ITEMS_TOTAL.clone()))
        .expect("SYNC_ITEMS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROVIDER_REQUESTS_TOTAL.clone()))
        .expect("PROVIDER_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_HITS_TOTAL.clone()))
        .expect("CACHE_HITS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_MISSES_TOTAL.clone()))
        .expect("CACHE_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_SIZE.clone()))
        .expect("CACHE_SIZE can be registered");
    REGISTRY
        .register(Box::new(CACHE_WARMS_TOTAL.clone()))
        .expect("CACHE_WARMS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
