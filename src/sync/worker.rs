//! Sync job execution
//!
//! Runs one claimed job end to end: validate the account, dispatch to the
//! job type's handler, record lifecycle events, settle the queue row and
//! refresh the caches derived from the synced data.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use super::handlers::{HandlerContext, HandlerReport, run_handler};
use super::job_type::JobType;
use super::provider::ProviderApi;
use super::queue::SyncQueue;
use super::retry::RetryPolicy;
use crate::cache::InvalidationOrchestrator;
use crate::data::{Database, EntityId, EventStatus, JobStatus, SyncJob, SyncStatusEvent};
use crate::error::AppError;
use crate::metrics::{ERRORS_TOTAL, SYNC_ITEMS_TOTAL, SYNC_JOB_DURATION_SECONDS, SYNC_JOBS_TOTAL};

/// Result of processing one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub success: bool,
    pub job_type: String,
    pub items_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only sink for job lifecycle events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusLog: Send + Sync {
    async fn record(&self, event: &SyncStatusEvent) -> Result<(), AppError>;
}

#[async_trait]
impl StatusLog for Database {
    async fn record(&self, event: &SyncStatusEvent) -> Result<(), AppError> {
        self.insert_sync_status_event(event).await
    }
}

enum Execution {
    Synced(JobType, HandlerReport),
    /// Account is inactive; nothing was fetched
    Skipped,
}

pub struct SyncWorker {
    db: Arc<Database>,
    queue: Arc<SyncQueue>,
    provider: Arc<dyn ProviderApi>,
    status_log: Arc<dyn StatusLog>,
    retry: RetryPolicy,
    orchestrator: Option<Arc<InvalidationOrchestrator>>,
    insights_days: i64,
}

impl SyncWorker {
    pub fn new(
        db: Arc<Database>,
        queue: Arc<SyncQueue>,
        provider: Arc<dyn ProviderApi>,
        status_log: Arc<dyn StatusLog>,
    ) -> Self {
        Self {
            db,
            queue,
            provider,
            status_log,
            retry: RetryPolicy::default(),
            orchestrator: None,
            insights_days: 30,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Invalidate the job type's cache scope after every successful job
    pub fn with_orchestrator(mut self, orchestrator: Arc<InvalidationOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_insights_days(mut self, days: i64) -> Self {
        self.insights_days = days;
        self
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Process a claimed job
    ///
    /// Never fails: every error ends up in the outcome, the job's event log
    /// and its queue status.
    pub async fn process_job(&self, job: &SyncJob) -> JobOutcome {
        let started = Instant::now();
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            account_id = %job.account_id,
            attempt = job.attempts,
            "Processing sync job"
        );

        self.log_event(
            job,
            EventStatus::Running,
            0,
            format!("Starting {} sync", job.job_type),
            serde_json::json!({ "job_id": job.id, "job_type": job.job_type }),
        )
        .await;

        let result = self.execute(job).await;
        let duration = started.elapsed();
        SYNC_JOB_DURATION_SECONDS
            .with_label_values(&[job.job_type.as_str()])
            .observe(duration.as_secs_f64());

        match result {
            Ok(execution) => {
                let (report, message, scope) = match execution {
                    Execution::Synced(job_type, report) => {
                        let message = format!("Completed {} sync", job_type);
                        (report, message, Some(job_type.invalidation_scope()))
                    }
                    Execution::Skipped => (
                        HandlerReport::default(),
                        format!("Account {} is inactive, sync skipped", job.account_id),
                        None,
                    ),
                };

                let mut metadata = serde_json::json!({
                    "duration_ms": duration.as_millis() as u64,
                    "skipped": scope.is_none(),
                });
                for (entity, count) in &report.counts {
                    metadata[entity.as_str()] = serde_json::json!(count);
                }
                self.log_event(job, EventStatus::Completed, report.items, message, metadata)
                    .await;
                self.settle(job, JobStatus::Completed, None).await;

                SYNC_JOBS_TOTAL
                    .with_label_values(&[job.job_type.as_str(), "completed"])
                    .inc();
                SYNC_ITEMS_TOTAL
                    .with_label_values(&[job.job_type.as_str()])
                    .inc_by(report.items);
                tracing::info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    items = report.items,
                    duration_ms = duration.as_millis() as u64,
                    "Sync job completed"
                );

                if let (Some(scope), Some(orchestrator)) = (scope, &self.orchestrator) {
                    orchestrator.invalidate_domain(scope, &job.user_id).await;
                }

                JobOutcome {
                    success: true,
                    job_type: job.job_type.clone(),
                    items_processed: report.items,
                    error: None,
                }
            }
            Err(message) => {
                self.log_event(
                    job,
                    EventStatus::Error,
                    0,
                    message.clone(),
                    serde_json::json!({ "duration_ms": duration.as_millis() as u64 }),
                )
                .await;
                self.settle(job, JobStatus::Failed, Some(&message)).await;

                SYNC_JOBS_TOTAL
                    .with_label_values(&[job.job_type.as_str(), "failed"])
                    .inc();
                ERRORS_TOTAL.with_label_values(&["sync_job"]).inc();
                tracing::error!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    error = %message,
                    "Sync job failed"
                );

                JobOutcome {
                    success: false,
                    job_type: job.job_type.clone(),
                    items_processed: 0,
                    error: Some(message),
                }
            }
        }
    }

    async fn execute(&self, job: &SyncJob) -> Result<Execution, String> {
        let job_type: JobType = job.job_type.parse()?;

        let account = self
            .db
            .get_account(&job.account_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Account {} not found", job.account_id))?;

        if !account.is_active {
            tracing::info!(job_id = %job.id, account_id = %account.id, "Skipping job for inactive account");
            return Ok(Execution::Skipped);
        }

        let ctx = HandlerContext {
            db: &self.db,
            provider: self.provider.as_ref(),
            retry: &self.retry,
            account: &account,
            job,
            insights_days: self.insights_days,
        };

        let report = run_handler(job_type, &ctx)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Execution::Synced(job_type, report))
    }

    async fn settle(&self, job: &SyncJob, status: JobStatus, message: Option<&str>) {
        if let Err(e) = self.queue.update_status(&job.id, status, message).await {
            ERRORS_TOTAL.with_label_values(&["queue"]).inc();
            tracing::error!(job_id = %job.id, status = %status, error = %e, "Failed to update job status");
        }
    }

    async fn log_event(
        &self,
        job: &SyncJob,
        status: EventStatus,
        items: u64,
        message: String,
        metadata: serde_json::Value,
    ) {
        let (current, percentage) = match status {
            EventStatus::Completed => (items as i64, 100),
            _ => (0, 0),
        };
        let event = SyncStatusEvent {
            id: EntityId::new().0,
            job_id: job.id.clone(),
            stage: job.job_type.clone(),
            status: status.as_str().to_string(),
            progress_current: current,
            progress_total: current,
            progress_percentage: percentage,
            message: Some(message),
            metadata: metadata.to_string(),
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.status_log.record(&event).await {
            tracing::warn!(
                job_id = %job.id,
                status = status.as_str(),
                error = %e,
                "Failed to write sync status event"
            );
        }
    }
}
