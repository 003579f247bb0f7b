//! Sync job queue
//!
//! Durable queue on the primary database. Enqueue coalesces work on the
//! same (account, job type, location) key into a job that is still pending;
//! a running job never absorbs new work. Dequeue is an atomic claim.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use super::job_type::JobType;
use super::trigger::SyncRequest;
use crate::data::{Database, EntityId, JobClaimFilter, JobStatus, SyncJob, SyncStatusEvent};
use crate::error::AppError;
use crate::metrics::SYNC_JOBS_TOTAL;

/// Job to be enqueued
#[derive(Debug, Clone)]
pub struct NewSyncJob {
    pub account_id: String,
    pub user_id: String,
    pub location_id: Option<String>,
    pub job_type: JobType,
    pub priority: i64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOutcome {
    pub job_id: String,
    pub job_type: JobType,
    /// An equivalent job was already pending
    pub coalesced: bool,
}

/// Optional filters for [`SyncQueue::dequeue`]
#[derive(Debug, Clone, Default)]
pub struct DequeueCriteria {
    pub account_id: Option<String>,
    pub job_types: Vec<JobType>,
}

pub struct SyncQueue {
    db: Arc<Database>,
    max_attempts: i64,
}

impl SyncQueue {
    /// # Arguments
    /// * `max_attempts` - Attempts granted to every new job
    pub fn new(db: Arc<Database>, max_attempts: i64) -> Self {
        Self {
            db,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Add a job, or return the pending job already covering its key
    pub async fn enqueue(&self, new_job: NewSyncJob) -> Result<EnqueueOutcome, AppError> {
        let now = Utc::now();
        let job = SyncJob {
            id: EntityId::new().0,
            account_id: new_job.account_id,
            user_id: new_job.user_id,
            location_id: new_job.location_id,
            job_type: new_job.job_type.as_str().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            priority: new_job.priority,
            attempts: 0,
            max_attempts: self.max_attempts,
            metadata: new_job.metadata.to_string(),
            message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        // The pending job can be claimed between the failed insert and the
        // lookup; a second pass then inserts normally.
        for _ in 0..2 {
            if self.db.insert_sync_job_unless_pending(&job).await? {
                SYNC_JOBS_TOTAL
                    .with_label_values(&[job.job_type.as_str(), "enqueued"])
                    .inc();
                tracing::info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    account_id = %job.account_id,
                    location_id = ?job.location_id,
                    "Enqueued sync job"
                );
                return Ok(EnqueueOutcome {
                    job_id: job.id,
                    job_type: new_job.job_type,
                    coalesced: false,
                });
            }

            if let Some(existing) = self
                .db
                .get_pending_sync_job(&job.account_id, &job.job_type, job.location_id.as_deref())
                .await?
            {
                SYNC_JOBS_TOTAL
                    .with_label_values(&[job.job_type.as_str(), "coalesced"])
                    .inc();
                tracing::debug!(
                    job_id = %existing.id,
                    job_type = %job.job_type,
                    "Coalesced sync job into pending job"
                );
                return Ok(EnqueueOutcome {
                    job_id: existing.id,
                    job_type: new_job.job_type,
                    coalesced: true,
                });
            }
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "could not enqueue {} job for account {}",
            job.job_type,
            job.account_id
        )))
    }

    /// Enqueue one job per requested type
    pub async fn enqueue_request(
        &self,
        request: &SyncRequest,
    ) -> Result<Vec<EnqueueOutcome>, AppError> {
        let metadata = serde_json::json!({
            "trigger_source": request.trigger_source,
            "incremental": request.incremental,
        });

        let mut outcomes = Vec::with_capacity(request.types.len());
        for job_type in &request.types {
            let outcome = self
                .enqueue(NewSyncJob {
                    account_id: request.account_id.clone(),
                    user_id: request.user_id.clone(),
                    location_id: request.location_id.clone(),
                    job_type: *job_type,
                    priority: request.priority,
                    metadata: metadata.clone(),
                })
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Claim the next runnable job
    pub async fn dequeue(&self, criteria: &DequeueCriteria) -> Result<Option<SyncJob>, AppError> {
        let filter = JobClaimFilter {
            account_id: criteria.account_id.clone(),
            job_types: criteria
                .job_types
                .iter()
                .map(|job_type| job_type.as_str().to_string())
                .collect(),
        };
        self.db.claim_next_sync_job(&filter).await
    }

    /// Move a job forward; terminal jobs are left untouched
    ///
    /// # Returns
    /// `true` if the job changed
    pub async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        message: Option<&str>,
    ) -> Result<bool, AppError> {
        let updated = self
            .db
            .update_sync_job_status(job_id, status, message)
            .await?;
        if !updated {
            tracing::debug!(job_id, status = %status, "Status update ignored");
        }
        Ok(updated)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<SyncJob>, AppError> {
        self.db.get_sync_job(job_id).await
    }

    pub async fn list_jobs_for_account(
        &self,
        account_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncJob>, AppError> {
        self.db.get_sync_jobs_for_account(account_id, limit).await
    }

    pub async fn list_events(&self, job_id: &str) -> Result<Vec<SyncStatusEvent>, AppError> {
        self.db.get_sync_status_events(job_id).await
    }

    /// Return a failed job with attempts left to the queue
    pub async fn requeue_failed(&self, job_id: &str) -> Result<bool, AppError> {
        let requeued = self.db.requeue_failed_sync_job(job_id).await?;
        if requeued {
            tracing::info!(job_id, "Requeued failed sync job");
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn queue() -> (SyncQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::connect(&temp_dir.path().join("test.db")).await.unwrap();
        (SyncQueue::new(Arc::new(db), 3), temp_dir)
    }

    fn new_job(job_type: JobType, location_id: Option<&str>) -> NewSyncJob {
        NewSyncJob {
            account_id: "acct-1".to_string(),
            user_id: "user-1".to_string(),
            location_id: location_id.map(str::to_string),
            job_type,
            priority: 0,
            metadata: serde_json::json!({"incremental": true}),
        }
    }

    #[tokio::test]
    async fn enqueue_coalesces_into_pending_job() {
        let (queue, _temp_dir) = queue().await;

        let first = queue.enqueue(new_job(JobType::Reviews, Some("loc-1"))).await.unwrap();
        assert!(!first.coalesced);

        let second = queue.enqueue(new_job(JobType::Reviews, Some("loc-1"))).await.unwrap();
        assert!(second.coalesced);
        assert_eq!(second.job_id, first.job_id);

        queue
            .update_status(&first.job_id, JobStatus::Completed, None)
            .await
            .unwrap();
        let after_completion = queue.enqueue(new_job(JobType::Reviews, Some("loc-1"))).await.unwrap();
        assert!(!after_completion.coalesced);
        assert_ne!(after_completion.job_id, first.job_id);
    }

    #[tokio::test]
    async fn enqueue_while_running_schedules_a_follow_up() {
        let (queue, _temp_dir) = queue().await;

        let first = queue.enqueue(new_job(JobType::Reviews, Some("loc-1"))).await.unwrap();
        let claimed = queue.dequeue(&DequeueCriteria::default()).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.job_id);

        // A change notified mid-run must not be folded into the running job
        let while_running = queue.enqueue(new_job(JobType::Reviews, Some("loc-1"))).await.unwrap();
        assert!(!while_running.coalesced);
        assert_ne!(while_running.job_id, first.job_id);

        // Further notifications fold into the follow-up
        let again = queue.enqueue(new_job(JobType::Reviews, Some("loc-1"))).await.unwrap();
        assert!(again.coalesced);
        assert_eq!(again.job_id, while_running.job_id);

        queue
            .update_status(&first.job_id, JobStatus::Completed, None)
            .await
            .unwrap();

        let next = queue.dequeue(&DequeueCriteria::default()).await.unwrap().unwrap();
        assert_eq!(next.id, while_running.job_id);
        assert_eq!(next.status(), Some(JobStatus::Running));
        assert!(queue.dequeue(&DequeueCriteria::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_request_creates_one_job_per_type() {
        let (queue, _temp_dir) = queue().await;
        let request = SyncRequest {
            account_id: "acct-1".to_string(),
            user_id: "user-1".to_string(),
            types: vec![JobType::Reviews, JobType::Questions],
            location_id: None,
            incremental: false,
            trigger_source: "manual".to_string(),
            priority: 1,
        };

        let outcomes = queue.enqueue_request(&request).await.unwrap();
        assert_eq!(outcomes.len(), 2);

        let job = queue.get_job(&outcomes[1].job_id).await.unwrap().unwrap();
        assert_eq!(job.job_type, "questions");
        assert_eq!(job.priority, 1);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.metadata_json()["trigger_source"], "manual");
        assert!(!job.is_incremental());
    }

    #[tokio::test]
    async fn dequeue_filters_by_job_type() {
        let (queue, _temp_dir) = queue().await;
        queue.enqueue(new_job(JobType::Reviews, None)).await.unwrap();
        let media = queue.enqueue(new_job(JobType::Media, None)).await.unwrap();

        let criteria = DequeueCriteria {
            account_id: Some("acct-1".to_string()),
            job_types: vec![JobType::Media],
        };
        let claimed = queue.dequeue(&criteria).await.unwrap().unwrap();
        assert_eq!(claimed.id, media.job_id);
        assert!(queue.dequeue(&criteria).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_jobs_ignore_status_updates() {
        let (queue, _temp_dir) = queue().await;
        let outcome = queue.enqueue(new_job(JobType::Posts, None)).await.unwrap();

        assert!(queue
            .update_status(&outcome.job_id, JobStatus::Failed, Some("boom"))
            .await
            .unwrap());
        assert!(!queue
            .update_status(&outcome.job_id, JobStatus::Completed, None)
            .await
            .unwrap());

        // Never claimed, so it still has attempts and can be requeued
        assert!(queue.requeue_failed(&outcome.job_id).await.unwrap());
        let job = queue.get_job(&outcome.job_id).await.unwrap().unwrap();
        assert_eq!(job.status(), Some(JobStatus::Pending));
    }
}
