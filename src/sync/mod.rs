//! Sync pipeline: queue, worker, handlers and the provider client

pub mod handlers;
mod job_type;
pub mod provider;
mod queue;
pub mod retry;
mod runner;
mod trigger;
mod worker;

pub use handlers::{HandlerContext, HandlerReport, run_handler};
pub use job_type::JobType;
pub use provider::{GoogleBusinessClient, ProviderApi};
pub use queue::{DequeueCriteria, EnqueueOutcome, NewSyncJob, SyncQueue};
pub use retry::{RetryPolicy, with_retry};
pub use runner::WorkerRunner;
pub use trigger::{SyncNotify, SyncRequest, SyncTrigger, run_trigger_pump};
pub use worker::{JobOutcome, StatusLog, SyncWorker};
