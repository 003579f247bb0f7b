//! Notification dispatch
//!
//! Turns a parsed notification into narrowly scoped sync requests. Nothing
//! here fails the HTTP request: every outcome is reported in the
//! acknowledgement body.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use super::notification::{NotificationKind, NotificationMessage, Transport};
use crate::data::{Database, Location, NotificationAudit};
use crate::metrics::{NOTIFICATION_KINDS_TOTAL, NOTIFICATIONS_RECEIVED_TOTAL};
use crate::sync::{SyncNotify, SyncRequest};

/// What happened to one notification tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEntry {
    /// Tag, or "notification" for entries about the whole message
    pub kind: String,
    /// `sync_requested`, `location_not_synced`, `ignored`, `duplicate` or `warning`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProcessedEntry {
    fn new(kind: &str, status: &str) -> Self {
        Self {
            kind: kind.to_string(),
            status: status.to_string(),
            location_id: None,
            job_type: None,
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestError {
    /// `parse_failed` or `lookup_failed`
    pub kind: String,
    pub message: String,
}

/// Acknowledgement body of one push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub processed: Vec<ProcessedEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<IngestError>,
}

impl IngestReport {
    /// Report for a body that could not be parsed
    pub fn parse_failed(transport: Transport, error: impl ToString) -> Self {
        let message = error.to_string();
        NOTIFICATIONS_RECEIVED_TOTAL
            .with_label_values(&[transport.as_str(), "parse_failed"])
            .inc();
        tracing::warn!(transport = %transport, error = %message, "Unparseable notification acknowledged");
        Self {
            processed: Vec::new(),
            errors: vec![IngestError {
                kind: "parse_failed".to_string(),
                message,
            }],
        }
    }

    /// Number of sync requests handed to the trigger
    pub fn sync_requests(&self) -> usize {
        self.processed
            .iter()
            .filter(|entry| entry.status == "sync_requested")
            .count()
    }
}

pub struct NotificationProcessor {
    db: Arc<Database>,
    notify: Arc<dyn SyncNotify>,
}

impl NotificationProcessor {
    pub fn new(db: Arc<Database>, notify: Arc<dyn SyncNotify>) -> Self {
        Self { db, notify }
    }

    pub async fn process(&self, message: &NotificationMessage) -> IngestReport {
        let transport = message.transport;
        let mut report = IngestReport::default();

        if let Some(message_id) = &message.message_id {
            if !self.record_audit(message, message_id).await {
                NOTIFICATIONS_RECEIVED_TOTAL
                    .with_label_values(&[transport.as_str(), "duplicate"])
                    .inc();
                tracing::debug!(message_id, transport = %transport, "Duplicate notification");
                report.processed.push(
                    ProcessedEntry::new("notification", "duplicate")
                        .with_message(format!("message {message_id} already processed")),
                );
                return report;
            }
        }

        for kind in &message.kinds {
            NOTIFICATION_KINDS_TOTAL.with_label_values(&[kind.as_str()]).inc();
        }

        let Some(resource) = &message.resource else {
            NOTIFICATIONS_RECEIVED_TOTAL
                .with_label_values(&[transport.as_str(), "unresolved"])
                .inc();
            tracing::warn!(
                resource_name = ?message.resource_name,
                transport = %transport,
                "Notification resource does not name a location"
            );
            report.processed.push(
                ProcessedEntry::new("notification", "warning")
                    .with_message("could not extract account and location from resource name"),
            );
            return report;
        };

        let location_key = resource.location_resource_name();
        let location = match self.db.get_location_by_resource_name(&location_key).await {
            Ok(location) => location,
            Err(e) => {
                tracing::error!(resource = %location_key, error = %e, "Location lookup failed");
                report.errors.push(IngestError {
                    kind: "lookup_failed".to_string(),
                    message: e.to_string(),
                });
                return report;
            }
        };

        for kind in &message.kinds {
            report
                .processed
                .push(self.dispatch(kind, location.as_ref(), &location_key, transport));
        }

        NOTIFICATIONS_RECEIVED_TOTAL
            .with_label_values(&[transport.as_str(), "processed"])
            .inc();
        tracing::info!(
            transport = %transport,
            resource = %location_key,
            kinds = message.kinds.len(),
            sync_requests = report.sync_requests(),
            "Processed notification"
        );
        report
    }

    fn dispatch(
        &self,
        kind: &NotificationKind,
        location: Option<&Location>,
        location_key: &str,
        transport: Transport,
    ) -> ProcessedEntry {
        let Some(job_type) = kind.job_type() else {
            tracing::debug!(kind = kind.as_str(), "Ignoring notification type");
            return ProcessedEntry::new(kind.as_str(), "ignored");
        };

        let Some(location) = location else {
            tracing::debug!(resource = %location_key, kind = kind.as_str(), "Location not synced yet, dropping");
            let mut entry = ProcessedEntry::new(kind.as_str(), "location_not_synced");
            entry.job_type = Some(job_type.as_str().to_string());
            return entry;
        };

        self.notify.notify(SyncRequest {
            account_id: location.account_id.clone(),
            user_id: location.user_id.clone(),
            types: vec![job_type],
            location_id: Some(location.id.clone()),
            incremental: true,
            trigger_source: transport.as_str().to_string(),
            priority: 0,
        });

        let mut entry = ProcessedEntry::new(kind.as_str(), "sync_requested");
        entry.location_id = Some(location.id.clone());
        entry.job_type = Some(job_type.as_str().to_string());
        entry
    }

    /// Record the message id; `false` when it was seen before
    ///
    /// Audit failures count as first delivery.
    async fn record_audit(&self, message: &NotificationMessage, message_id: &str) -> bool {
        let audit = NotificationAudit {
            message_id: message_id.to_string(),
            transport: message.transport.as_str().to_string(),
            resource_name: message.resource_name.clone(),
            kinds: message
                .kinds
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(","),
            account_ref: message.resource.as_ref().map(|r| r.account_id.clone()),
            location_ref: message.resource.as_ref().map(|r| r.location_id.clone()),
            received_at: Utc::now(),
        };

        match self.db.record_notification(&audit).await {
            Ok(first) => first,
            Err(e) => {
                tracing::warn!(message_id, error = %e, "Failed to record notification audit");
                true
            }
        }
    }
}
