//! API layer
//!
//! HTTP handlers for:
//! - Provider push notifications (direct webhook and broker push)
//! - Sync queue control and inspection
//! - Cache invalidation and statistics
//! - Metrics (Prometheus)

mod cache;
pub mod metrics;
mod sync;
mod webhook;

pub use cache::cache_router;
pub use metrics::{metrics_router, track_requests};
pub use sync::sync_router;
pub use webhook::{client_key, webhook_router};
