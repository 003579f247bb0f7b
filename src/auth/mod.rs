//! Internal API authentication
//!
//! The sync, queue and cache endpoints are called by trusted services
//! holding `api.internal_token`.

mod middleware;

pub use middleware::require_internal_auth;
