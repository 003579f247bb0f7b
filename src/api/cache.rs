//! Cache endpoints
//!
//! Callers never address cache keys directly; they name a domain scope and
//! the orchestrator decides what to refresh.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::cache::{CacheStats, InvalidationReport, InvalidationScope};
use crate::error::AppError;
use crate::ingest::RateLimitStats;

/// Routes, relative to `/api`:
/// - POST /cache/invalidate
/// - GET /cache/stats
pub fn cache_router() -> Router<AppState> {
    Router::new()
        .route("/cache/invalidate", post(invalidate))
        .route("/cache/stats", get(stats))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvalidateRequest {
    scope: InvalidationScope,
    user_id: String,
}

/// POST /api/cache/invalidate
async fn invalidate(
    State(state): State<AppState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidationReport>, AppError> {
    if request.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId must not be empty".to_string()));
    }

    let report = state
        .orchestrator
        .invalidate_domain(request.scope, &request.user_id)
        .await;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    cache: CacheStats,
    rate_limit: RateLimitStats,
}

/// GET /api/cache/stats
async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        cache: state.cache.stats(),
        rate_limit: state.rate_limiter.stats().await,
    })
}
