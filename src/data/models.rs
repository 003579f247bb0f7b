//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tenancy
// =============================================================================

/// A connected provider account owned by one dashboard user
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: String,
    /// Dashboard user that owns the account
    pub user_id: String,
    pub name: String,
    /// Provider resource name, e.g. "accounts/1234567890"
    pub provider_account_name: String,
    /// OAuth access token used for provider calls
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Inactive accounts are never synced
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A business location under an account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Location {
    pub id: String,
    pub account_id: String,
    pub user_id: String,
    /// Provider resource path, e.g. "accounts/123/locations/456"
    pub resource_name: String,
    pub title: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub verification_state: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Synced listing content
// =============================================================================

/// A customer review of a location
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub id: String,
    pub location_id: String,
    /// Provider resource path (unique, upsert key)
    pub resource_name: String,
    pub reviewer_name: Option<String>,
    /// 1..=5
    pub star_rating: Option<i64>,
    pub comment: Option<String>,
    pub reply_comment: Option<String>,
    pub reply_updated_at: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// A public question asked on a location
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Question {
    pub id: String,
    pub location_id: String,
    pub resource_name: String,
    pub author_name: Option<String>,
    pub text: String,
    pub upvote_count: i64,
    pub answer_count: i64,
    pub top_answer: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// A local post published on a location
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: String,
    pub location_id: String,
    pub resource_name: String,
    pub topic_type: Option<String>,
    pub summary: Option<String>,
    pub state: Option<String>,
    pub search_url: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// A photo or video attached to a location
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaItem {
    pub id: String,
    pub location_id: String,
    pub resource_name: String,
    pub media_format: Option<String>,
    pub category: Option<String>,
    pub google_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub create_time: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// One daily value of one performance metric
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Insight {
    pub location_id: String,
    pub metric: String,
    /// Calendar date, "YYYY-MM-DD"
    pub date: String,
    pub value: i64,
    pub synced_at: DateTime<Utc>,
}

/// Aggregate numbers shown on the dashboard home page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardOverview {
    pub locations: i64,
    pub reviews: i64,
    pub unanswered_reviews: i64,
    pub average_rating: Option<f64>,
    pub questions: i64,
    pub unanswered_questions: i64,
    pub posts: i64,
}

// =============================================================================
// Sync jobs
// =============================================================================

/// Lifecycle state of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One queued unit of work: one entity type for one account or location
///
/// `job_type` is kept as stored text; it is parsed into
/// [`crate::sync::JobType`] at dispatch so unknown values surface as job
/// failures instead of row decoding errors.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncJob {
    pub id: String,
    pub account_id: String,
    pub user_id: String,
    pub location_id: Option<String>,
    pub job_type: String,
    pub status: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    /// JSON object (trigger source, incremental flag, provider resource ids)
    pub metadata: String,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    /// Parsed metadata object, `{}` when the stored text is not JSON
    pub fn metadata_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.metadata).unwrap_or_else(|_| serde_json::json!({}))
    }

    /// Whether the job only covers new or changed items
    pub fn is_incremental(&self) -> bool {
        self.metadata_json()
            .get("incremental")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }
}

/// Status of a single lifecycle log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Running => "running",
            EventStatus::Completed => "completed",
            EventStatus::Error => "error",
        }
    }
}

/// Append-only lifecycle log row for a sync job
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncStatusEvent {
    pub id: String,
    pub job_id: String,
    pub stage: String,
    pub status: String,
    pub progress_current: i64,
    pub progress_total: i64,
    pub progress_percentage: i64,
    pub message: Option<String>,
    /// JSON object (duration_ms, per-entity counts)
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

impl SyncStatusEvent {
    pub fn metadata_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.metadata).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Audit row for one received push notification
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationAudit {
    pub message_id: String,
    pub transport: String,
    pub resource_name: Option<String>,
    /// Comma separated notification type tags
    pub kinds: String,
    pub account_ref: Option<String>,
    pub location_ref: Option<String>,
    pub received_at: DateTime<Utc>,
}
