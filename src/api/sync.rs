//! Sync queue endpoints
//!
//! Used by schedulers and dashboards to request syncs and inspect jobs.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::data::{SyncJob, SyncStatusEvent};
use crate::error::AppError;
use crate::sync::{EnqueueOutcome, JobType, SyncRequest};

const DEFAULT_JOB_LIMIT: i64 = 20;
const MAX_JOB_LIMIT: i64 = 100;

/// Routes, relative to `/api`:
/// - POST /sync/trigger
/// - GET /sync/jobs/:id
/// - POST /sync/jobs/:id/requeue
/// - GET /sync/accounts/:account_id/jobs
pub fn sync_router() -> Router<AppState> {
    Router::new()
        .route("/sync/trigger", post(trigger_sync))
        .route("/sync/jobs/:id", get(get_job))
        .route("/sync/jobs/:id/requeue", post(requeue_job))
        .route("/sync/accounts/:account_id/jobs", get(list_account_jobs))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerRequest {
    account_id: String,
    types: Vec<JobType>,
    location_id: Option<String>,
    #[serde(default)]
    incremental: bool,
    #[serde(default)]
    priority: i64,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    jobs: Vec<EnqueueOutcome>,
}

/// POST /api/sync/trigger
async fn trigger_sync(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    if request.types.is_empty() {
        return Err(AppError::Validation("types must not be empty".to_string()));
    }

    let account = state
        .db
        .get_account(&request.account_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if let Some(location_id) = &request.location_id {
        let location = state
            .db
            .get_location(location_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if location.account_id != account.id {
            return Err(AppError::Validation(format!(
                "location {location_id} does not belong to account {}",
                account.id
            )));
        }
    }

    let jobs = state
        .queue
        .enqueue_request(&SyncRequest {
            account_id: account.id,
            user_id: account.user_id,
            types: request.types,
            location_id: request.location_id,
            incremental: request.incremental,
            trigger_source: "manual".to_string(),
            priority: request.priority,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(TriggerResponse { jobs })))
}

#[derive(Debug, Serialize)]
struct JobDetail {
    job: SyncJob,
    events: Vec<SyncStatusEvent>,
}

/// GET /api/sync/jobs/:id
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobDetail>, AppError> {
    let job = state.queue.get_job(&id).await?.ok_or(AppError::NotFound)?;
    let events = state.queue.list_events(&id).await?;
    Ok(Json(JobDetail { job, events }))
}

#[derive(Debug, Serialize)]
struct RequeueResponse {
    requeued: bool,
}

/// POST /api/sync/jobs/:id/requeue
///
/// Only failed jobs with attempts left go back to `pending`.
async fn requeue_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RequeueResponse>, AppError> {
    if state.queue.get_job(&id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    let requeued = state.queue.requeue_failed(&id).await?;
    Ok(Json(RequeueResponse { requeued }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
}

/// GET /api/sync/accounts/:account_id/jobs
async fn list_account_jobs(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SyncJob>>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_JOB_LIMIT)
        .clamp(1, MAX_JOB_LIMIT);
    let jobs = state.queue.list_jobs_for_account(&account_id, limit).await?;
    Ok(Json(jobs))
}
