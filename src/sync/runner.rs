//! Background job consumers

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::queue::DequeueCriteria;
use super::worker::{JobOutcome, SyncWorker};
use crate::config::WorkerConfig;
use crate::error::AppError;

/// Pool of consumers draining the sync queue
pub struct WorkerRunner {
    worker: Arc<SyncWorker>,
    criteria: DequeueCriteria,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerRunner {
    pub fn new(worker: Arc<SyncWorker>, config: &WorkerConfig) -> Self {
        Self {
            worker,
            criteria: DequeueCriteria::default(),
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
        }
    }

    /// Only claim jobs matching `criteria`
    pub fn with_criteria(mut self, criteria: DequeueCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Claim and process at most one job
    ///
    /// # Returns
    /// `None` when no job was runnable
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, AppError> {
        let Some(job) = self.worker.queue().dequeue(&self.criteria).await? else {
            return Ok(None);
        };
        Ok(Some(self.worker.process_job(&job).await))
    }

    /// Process jobs until the queue has nothing runnable
    pub async fn drain(&self) -> Result<Vec<JobOutcome>, AppError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Start the consumers; each runs until its task is aborted
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        tracing::info!(
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting sync workers"
        );

        (0..self.concurrency)
            .map(|consumer| {
                let runner = self.clone();
                tokio::spawn(async move { runner.consume(consumer).await })
            })
            .collect()
    }

    async fn consume(&self, consumer: usize) {
        loop {
            match self.run_once().await {
                Ok(Some(outcome)) => {
                    tracing::debug!(consumer, success = outcome.success, job_type = %outcome.job_type, "Consumer finished job");
                }
                Ok(None) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    tracing::warn!(consumer, error = %e, "Failed to claim sync job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
