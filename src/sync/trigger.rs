//! Fire-and-forget sync triggering
//!
//! Producers hand a [`SyncRequest`] to a [`SyncNotify`] and move on; the
//! send never waits and never reports the enqueue outcome. A pump task on
//! the other end of the channel turns requests into queued jobs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::job_type::JobType;
use super::queue::SyncQueue;

/// Request to sync some entity types of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub account_id: String,
    pub user_id: String,
    pub types: Vec<JobType>,
    pub location_id: Option<String>,
    pub incremental: bool,
    /// Where the request came from ("webhook", "pubsub", "manual")
    pub trigger_source: String,
    #[serde(default)]
    pub priority: i64,
}

/// Capability to request a sync without observing its outcome
pub trait SyncNotify: Send + Sync {
    fn notify(&self, request: SyncRequest);
}

/// Channel-backed [`SyncNotify`]
#[derive(Clone)]
pub struct SyncTrigger {
    tx: mpsc::UnboundedSender<SyncRequest>,
}

impl SyncTrigger {
    /// Create a trigger and the receiver its requests arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SyncNotify for SyncTrigger {
    fn notify(&self, request: SyncRequest) {
        if let Err(e) = self.tx.send(request) {
            tracing::warn!(account_id = %e.0.account_id, "Sync trigger channel closed, request dropped");
        }
    }
}

/// Enqueue every request arriving on `rx` until all senders are gone
pub async fn run_trigger_pump(mut rx: mpsc::UnboundedReceiver<SyncRequest>, queue: Arc<SyncQueue>) {
    while let Some(request) = rx.recv().await {
        match queue.enqueue_request(&request).await {
            Ok(outcomes) => {
                tracing::debug!(
                    account_id = %request.account_id,
                    source = %request.trigger_source,
                    jobs = outcomes.len(),
                    "Processed sync request"
                );
            }
            Err(e) => {
                tracing::error!(
                    account_id = %request.account_id,
                    source = %request.trigger_source,
                    error = %e,
                    "Failed to enqueue sync request"
                );
            }
        }
    }
    tracing::info!("Sync trigger pump stopped");
}
