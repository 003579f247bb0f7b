//! SQLite database operations
//!
//! All database access goes through this module.
//! Uses SQLx with embedded migrations.

use chrono::{DateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Filters applied when claiming the next job
#[derive(Debug, Clone, Default)]
pub struct JobClaimFilter {
    pub account_id: Option<String>,
    /// Stored job type names; empty means any type
    pub job_types: Vec<String>,
}

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Get an account by ID
    pub async fn get_account(&self, id: &str) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    /// Create or update an account
    pub async fn upsert_account(&self, account: &Account) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, user_id, name, provider_account_name, access_token, is_active,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                name = excluded.name,
                provider_account_name = excluded.provider_account_name,
                access_token = excluded.access_token,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(&account.name)
        .bind(&account.provider_account_name)
        .bind(&account.access_token)
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Locations
    // =========================================================================

    /// Get a location by ID
    pub async fn get_location(&self, id: &str) -> Result<Option<Location>, AppError> {
        let location = sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(location)
    }

    /// Get a location by its provider resource path
    ///
    /// # Arguments
    /// * `resource_name` - e.g. "accounts/123/locations/456"
    pub async fn get_location_by_resource_name(
        &self,
        resource_name: &str,
    ) -> Result<Option<Location>, AppError> {
        let location =
            sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE resource_name = ?")
                .bind(resource_name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(location)
    }

    /// Active locations of an account, oldest first
    pub async fn get_locations_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<Location>, AppError> {
        let locations = sqlx::query_as::<_, Location>(
            "SELECT * FROM locations WHERE account_id = ? AND is_active = 1 ORDER BY created_at ASC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(locations)
    }

    /// Active locations owned by a dashboard user
    pub async fn get_locations_for_user(&self, user_id: &str) -> Result<Vec<Location>, AppError> {
        let locations = sqlx::query_as::<_, Location>(
            "SELECT * FROM locations WHERE user_id = ? AND is_active = 1 ORDER BY title ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(locations)
    }

    /// Insert a location or refresh it by resource name
    ///
    /// The local ID of an existing row is kept.
    pub async fn upsert_location(&self, location: &Location) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO locations (
                id, account_id, user_id, resource_name, title, address, phone, website,
                verification_state, is_active, created_at, updated_at, synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_name) DO UPDATE SET
                title = excluded.title,
                address = excluded.address,
                phone = excluded.phone,
                website = excluded.website,
                verification_state = excluded.verification_state,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&location.id)
        .bind(&location.account_id)
        .bind(&location.user_id)
        .bind(&location.resource_name)
        .bind(&location.title)
        .bind(&location.address)
        .bind(&location.phone)
        .bind(&location.website)
        .bind(&location.verification_state)
        .bind(location.is_active)
        .bind(location.created_at)
        .bind(location.updated_at)
        .bind(location.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Reviews
    // =========================================================================

    /// Insert a review or refresh it by resource name
    pub async fn upsert_review(&self, review: &Review) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO reviews (
                id, location_id, resource_name, reviewer_name, star_rating, comment,
                reply_comment, reply_updated_at, create_time, update_time, synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_name) DO UPDATE SET
                reviewer_name = excluded.reviewer_name,
                star_rating = excluded.star_rating,
                comment = excluded.comment,
                reply_comment = excluded.reply_comment,
                reply_updated_at = excluded.reply_updated_at,
                update_time = excluded.update_time,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&review.id)
        .bind(&review.location_id)
        .bind(&review.resource_name)
        .bind(&review.reviewer_name)
        .bind(review.star_rating)
        .bind(&review.comment)
        .bind(&review.reply_comment)
        .bind(review.reply_updated_at)
        .bind(review.create_time)
        .bind(review.update_time)
        .bind(review.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Newest stored review update time for a location
    pub async fn latest_review_update(
        &self,
        location_id: &str,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let latest = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT update_time FROM reviews WHERE location_id = ? ORDER BY update_time DESC LIMIT 1",
        )
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest)
    }

    /// Most recently updated reviews across a user's locations
    pub async fn get_reviews_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Review>, AppError> {
        let reviews = sqlx::query_as::<_, Review>(
            r#"
            SELECT r.* FROM reviews r
            JOIN locations l ON l.id = r.location_id
            WHERE l.user_id = ?
            ORDER BY r.update_time DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(reviews)
    }

    // =========================================================================
    // Questions
    // =========================================================================

    /// Insert a question or refresh it by resource name
    pub async fn upsert_question(&self, question: &Question) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO questions (
                id, location_id, resource_name, author_name, text, upvote_count,
                answer_count, top_answer, create_time, update_time, synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_name) DO UPDATE SET
                author_name = excluded.author_name,
                text = excluded.text,
                upvote_count = excluded.upvote_count,
                answer_count = excluded.answer_count,
                top_answer = excluded.top_answer,
                update_time = excluded.update_time,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&question.id)
        .bind(&question.location_id)
        .bind(&question.resource_name)
        .bind(&question.author_name)
        .bind(&question.text)
        .bind(question.upvote_count)
        .bind(question.answer_count)
        .bind(&question.top_answer)
        .bind(question.create_time)
        .bind(question.update_time)
        .bind(question.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Newest stored question update time for a location
    pub async fn latest_question_update(
        &self,
        location_id: &str,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let latest = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT update_time FROM questions WHERE location_id = ? ORDER BY update_time DESC LIMIT 1",
        )
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest)
    }

    /// Most recently updated questions across a user's locations
    pub async fn get_questions_for_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Question>, AppError> {
        let questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT q.* FROM questions q
            JOIN locations l ON l.id = q.location_id
            WHERE l.user_id = ?
            ORDER BY q.update_time DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(questions)
    }

    // =========================================================================
    // Posts, media and insights
    // =========================================================================

    /// Insert a post or refresh it by resource name
    pub async fn upsert_post(&self, post: &Post) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO posts (
                id, location_id, resource_name, topic_type, summary, state, search_url,
                create_time, update_time, synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_name) DO UPDATE SET
                topic_type = excluded.topic_type,
                summary = excluded.summary,
                state = excluded.state,
                search_url = excluded.search_url,
                update_time = excluded.update_time,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&post.id)
        .bind(&post.location_id)
        .bind(&post.resource_name)
        .bind(&post.topic_type)
        .bind(&post.summary)
        .bind(&post.state)
        .bind(&post.search_url)
        .bind(post.create_time)
        .bind(post.update_time)
        .bind(post.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Newest stored post update time for a location
    pub async fn latest_post_update(
        &self,
        location_id: &str,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let latest = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT update_time FROM posts WHERE location_id = ? ORDER BY update_time DESC LIMIT 1",
        )
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest)
    }

    /// Insert a media item or refresh it by resource name
    pub async fn upsert_media_item(&self, item: &MediaItem) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO media_items (
                id, location_id, resource_name, media_format, category, google_url,
                thumbnail_url, create_time, synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_name) DO UPDATE SET
                media_format = excluded.media_format,
                category = excluded.category,
                google_url = excluded.google_url,
                thumbnail_url = excluded.thumbnail_url,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.location_id)
        .bind(&item.resource_name)
        .bind(&item.media_format)
        .bind(&item.category)
        .bind(&item.google_url)
        .bind(&item.thumbnail_url)
        .bind(item.create_time)
        .bind(item.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or overwrite one daily metric value
    pub async fn upsert_insight(&self, insight: &Insight) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO insights (location_id, metric, date, value, synced_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(location_id, metric, date) DO UPDATE SET
                value = excluded.value,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&insight.location_id)
        .bind(&insight.metric)
        .bind(&insight.date)
        .bind(insight.value)
        .bind(insight.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Aggregate counters for a user's dashboard home page
    pub async fn get_dashboard_overview(
        &self,
        user_id: &str,
    ) -> Result<DashboardOverview, AppError> {
        let locations = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM locations WHERE user_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let (reviews, unanswered_reviews, average_rating) =
            sqlx::query_as::<_, (i64, i64, Option<f64>)>(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN r.reply_comment IS NULL THEN 1 ELSE 0 END), 0),
                    AVG(r.star_rating)
                FROM reviews r
                JOIN locations l ON l.id = r.location_id
                WHERE l.user_id = ?
                "#,
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let (questions, unanswered_questions) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN q.answer_count = 0 THEN 1 ELSE 0 END), 0)
            FROM questions q
            JOIN locations l ON l.id = q.location_id
            WHERE l.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let posts = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM posts p
            JOIN locations l ON l.id = p.location_id
            WHERE l.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(DashboardOverview {
            locations,
            reviews,
            unanswered_reviews,
            average_rating,
            questions,
            unanswered_questions,
            posts,
        })
    }

    // =========================================================================
    // Sync jobs
    // =========================================================================

    /// Insert a job unless its actionable key already has a pending job
    ///
    /// The key is (account, job type, location). A running job does not
    /// block the insert: it may have read the provider before the change
    /// that triggered this call. The check and insert are a
    /// single statement, so two concurrent callers cannot both see an empty
    /// key inside this process' connection pool.
    ///
    /// # Returns
    /// `true` if inserted, `false` if a pending job already existed.
    pub async fn insert_sync_job_unless_pending(&self, job: &SyncJob) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, account_id, user_id, location_id, job_type, status, priority,
                attempts, max_attempts, metadata, message, created_at, updated_at,
                started_at, completed_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM sync_jobs
                WHERE account_id = ? AND job_type = ? AND location_id IS ?
                  AND status = 'pending'
            )
            "#,
        )
        .bind(&job.id)
        .bind(&job.account_id)
        .bind(&job.user_id)
        .bind(&job.location_id)
        .bind(&job.job_type)
        .bind(&job.status)
        .bind(job.priority)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(&job.metadata)
        .bind(&job.message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.account_id)
        .bind(&job.job_type)
        .bind(&job.location_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Oldest pending job for an actionable key
    pub async fn get_pending_sync_job(
        &self,
        account_id: &str,
        job_type: &str,
        location_id: Option<&str>,
    ) -> Result<Option<SyncJob>, AppError> {
        let job = sqlx::query_as::<_, SyncJob>(
            r#"
            SELECT * FROM sync_jobs
            WHERE account_id = ? AND job_type = ? AND location_id IS ?
              AND status = 'pending'
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(job_type)
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Atomically claim the next runnable job
    ///
    /// Picks the highest priority, oldest pending job that still has
    /// attempts left, marks it running and counts the attempt.
    pub async fn claim_next_sync_job(
        &self,
        filter: &JobClaimFilter,
    ) -> Result<Option<SyncJob>, AppError> {
        let now = Utc::now();
        let mut builder = QueryBuilder::<Sqlite>::new(
            "UPDATE sync_jobs SET status = 'running', attempts = attempts + 1, started_at = ",
        );
        builder.push_bind(now);
        builder.push(", updated_at = ");
        builder.push_bind(now);
        builder.push(
            " WHERE status = 'pending' AND id = (SELECT id FROM sync_jobs \
             WHERE status = 'pending' AND attempts < max_attempts",
        );

        if let Some(account_id) = &filter.account_id {
            builder.push(" AND account_id = ");
            builder.push_bind(account_id.clone());
        }

        if !filter.job_types.is_empty() {
            builder.push(" AND job_type IN (");
            let mut separated = builder.separated(", ");
            for job_type in &filter.job_types {
                separated.push_bind(job_type.clone());
            }
            separated.push_unseparated(")");
        }

        builder.push(" ORDER BY priority DESC, created_at ASC LIMIT 1) RETURNING *");

        let job = builder
            .build_query_as::<SyncJob>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    /// Move a job forward in its lifecycle
    ///
    /// `running` is only reachable from `pending`; `completed` and `failed`
    /// from `pending` or `running`. Terminal jobs are never touched.
    ///
    /// # Returns
    /// `true` if the row changed.
    pub async fn update_sync_job_status(
        &self,
        id: &str,
        status: JobStatus,
        message: Option<&str>,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        let result = match status {
            JobStatus::Pending => return Ok(false),
            JobStatus::Running => {
                sqlx::query(
                    r#"
                    UPDATE sync_jobs SET status = 'running', message = ?, updated_at = ?
                    WHERE id = ? AND status = 'pending'
                    "#,
                )
                .bind(message)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            JobStatus::Completed | JobStatus::Failed => {
                sqlx::query(
                    r#"
                    UPDATE sync_jobs SET status = ?, message = ?, updated_at = ?, completed_at = ?
                    WHERE id = ? AND status IN ('pending', 'running')
                    "#,
                )
                .bind(status.as_str())
                .bind(message)
                .bind(now)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    /// Put a failed job back in the queue if it has attempts left
    pub async fn requeue_failed_sync_job(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET status = 'pending', updated_at = ?, started_at = NULL, completed_at = NULL
            WHERE id = ? AND status = 'failed' AND attempts < max_attempts
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a job by ID
    pub async fn get_sync_job(&self, id: &str) -> Result<Option<SyncJob>, AppError> {
        let job = sqlx::query_as::<_, SyncJob>("SELECT * FROM sync_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    /// Most recent jobs of an account
    pub async fn get_sync_jobs_for_account(
        &self,
        account_id: &str,
        limit: i64,
    ) -> Result<Vec<SyncJob>, AppError> {
        let jobs = sqlx::query_as::<_, SyncJob>(
            "SELECT * FROM sync_jobs WHERE account_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    // =========================================================================
    // Sync status events
    // =========================================================================

    /// Append one lifecycle row
    pub async fn insert_sync_status_event(&self, event: &SyncStatusEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sync_status_events (
                id, job_id, stage, status, progress_current, progress_total,
                progress_percentage, message, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.job_id)
        .bind(&event.stage)
        .bind(&event.status)
        .bind(event.progress_current)
        .bind(event.progress_total)
        .bind(event.progress_percentage)
        .bind(&event.message)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lifecycle rows of a job in write order
    pub async fn get_sync_status_events(
        &self,
        job_id: &str,
    ) -> Result<Vec<SyncStatusEvent>, AppError> {
        let events = sqlx::query_as::<_, SyncStatusEvent>(
            "SELECT * FROM sync_status_events WHERE job_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    // =========================================================================
    // Notification audit
    // =========================================================================

    /// Record a received notification
    ///
    /// # Returns
    /// `false` when the message ID was already recorded (a redelivery).
    pub async fn record_notification(
        &self,
        audit: &NotificationAudit,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO notification_audit (
                message_id, transport, resource_name, kinds, account_ref, location_ref, received_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit.message_id)
        .bind(&audit.transport)
        .bind(&audit.resource_name)
        .bind(&audit.kinds)
        .bind(&audit.account_ref)
        .bind(&audit.location_ref)
        .bind(audit.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
