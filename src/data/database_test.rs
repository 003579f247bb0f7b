//! Database tests

use super::*;
use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn account(id: &str, user_id: &str) -> Account {
    Account {
        id: id.to_string(),
        user_id: user_id.to_string(),
        name: "Test Business".to_string(),
        provider_account_name: format!("accounts/{id}"),
        access_token: Some("token".to_string()),
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn location(id: &str, account: &Account, provider_location: &str) -> Location {
    Location {
        id: id.to_string(),
        account_id: account.id.clone(),
        user_id: account.user_id.clone(),
        resource_name: format!("{}/locations/{}", account.provider_account_name, provider_location),
        title: format!("Location {provider_location}"),
        address: None,
        phone: None,
        website: None,
        verification_state: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        synced_at: None,
    }
}

fn review(location_id: &str, name: &str, rating: i64, updated: chrono::DateTime<Utc>) -> Review {
    Review {
        id: EntityId::new().0,
        location_id: location_id.to_string(),
        resource_name: name.to_string(),
        reviewer_name: Some("Reviewer".to_string()),
        star_rating: Some(rating),
        comment: Some("Great".to_string()),
        reply_comment: None,
        reply_updated_at: None,
        create_time: updated,
        update_time: updated,
        synced_at: Utc::now(),
    }
}

fn job(account_id: &str, job_type: &str, location_id: Option<&str>) -> SyncJob {
    let now = Utc::now();
    SyncJob {
        id: EntityId::new().0,
        account_id: account_id.to_string(),
        user_id: "user-1".to_string(),
        location_id: location_id.map(str::to_string),
        job_type: job_type.to_string(),
        status: JobStatus::Pending.as_str().to_string(),
        priority: 0,
        attempts: 0,
        max_attempts: 3,
        metadata: "{}".to_string(),
        message: None,
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_account_upsert_and_get() {
    let (db, _temp_dir) = create_test_db().await;

    let mut acct = account("acct-1", "user-1");
    db.upsert_account(&acct).await.unwrap();

    acct.is_active = false;
    db.upsert_account(&acct).await.unwrap();

    let retrieved = db.get_account("acct-1").await.unwrap().unwrap();
    assert_eq!(retrieved.user_id, "user-1");
    assert!(!retrieved.is_active);
    assert!(db.get_account("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_location_lookup_by_resource_name() {
    let (db, _temp_dir) = create_test_db().await;
    let acct = account("123", "user-1");
    db.upsert_account(&acct).await.unwrap();

    let loc = location("loc-1", &acct, "456");
    db.upsert_location(&loc).await.unwrap();

    let found = db
        .get_location_by_resource_name("accounts/123/locations/456")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, "loc-1");

    assert!(
        db.get_location_by_resource_name("accounts/123/locations/999")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_location_upsert_keeps_local_id() {
    let (db, _temp_dir) = create_test_db().await;
    let acct = account("123", "user-1");
    db.upsert_account(&acct).await.unwrap();

    db.upsert_location(&location("loc-1", &acct, "456"))
        .await
        .unwrap();

    let mut refreshed = location("other-id", &acct, "456");
    refreshed.title = "Renamed".to_string();
    db.upsert_location(&refreshed).await.unwrap();

    let locations = db.get_locations_for_account("123").await.unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].id, "loc-1");
    assert_eq!(locations[0].title, "Renamed");
}

#[tokio::test]
async fn test_review_upsert_is_idempotent() {
    let (db, _temp_dir) = create_test_db().await;
    let acct = account("123", "user-1");
    db.upsert_account(&acct).await.unwrap();
    db.upsert_location(&location("loc-1", &acct, "456"))
        .await
        .unwrap();

    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let first = review("loc-1", "accounts/123/locations/456/reviews/r1", 4, t0);
    db.upsert_review(&first).await.unwrap();
    db.upsert_review(&first).await.unwrap();

    let mut second = review(
        "loc-1",
        "accounts/123/locations/456/reviews/r2",
        2,
        t0 + Duration::days(1),
    );
    second.reply_comment = Some("Thanks".to_string());
    db.upsert_review(&second).await.unwrap();

    let reviews = db.get_reviews_for_user("user-1", 10).await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0].resource_name, second.resource_name);

    let latest = db.latest_review_update("loc-1").await.unwrap();
    assert_eq!(latest, Some(t0 + Duration::days(1)));
    assert_eq!(db.latest_review_update("loc-2").await.unwrap(), None);
}

#[tokio::test]
async fn test_dashboard_overview_aggregates() {
    let (db, _temp_dir) = create_test_db().await;
    let acct = account("123", "user-1");
    db.upsert_account(&acct).await.unwrap();
    db.upsert_location(&location("loc-1", &acct, "456"))
        .await
        .unwrap();

    let now = Utc::now();
    let mut answered = review("loc-1", "r/1", 5, now);
    answered.reply_comment = Some("Thank you".to_string());
    db.upsert_review(&answered).await.unwrap();
    db.upsert_review(&review("loc-1", "r/2", 3, now)).await.unwrap();

    db.upsert_question(&Question {
        id: EntityId::new().0,
        location_id: "loc-1".to_string(),
        resource_name: "q/1".to_string(),
        author_name: None,
        text: "Open on Sundays?".to_string(),
        upvote_count: 2,
        answer_count: 0,
        top_answer: None,
        create_time: now,
        update_time: now,
        synced_at: now,
    })
    .await
    .unwrap();

    let overview = db.get_dashboard_overview("user-1").await.unwrap();
    assert_eq!(overview.locations, 1);
    assert_eq!(overview.reviews, 2);
    assert_eq!(overview.unanswered_reviews, 1);
    assert_eq!(overview.average_rating, Some(4.0));
    assert_eq!(overview.questions, 1);
    assert_eq!(overview.unanswered_questions, 1);
    assert_eq!(overview.posts, 0);

    let empty = db.get_dashboard_overview("nobody").await.unwrap();
    assert_eq!(empty.reviews, 0);
    assert_eq!(empty.average_rating, None);
}

#[tokio::test]
async fn test_insight_upsert_overwrites_value() {
    let (db, _temp_dir) = create_test_db().await;
    let acct = account("123", "user-1");
    db.upsert_account(&acct).await.unwrap();
    db.upsert_location(&location("loc-1", &acct, "456"))
        .await
        .unwrap();

    let mut insight = Insight {
        location_id: "loc-1".to_string(),
        metric: "WEBSITE_CLICKS".to_string(),
        date: "2024-03-01".to_string(),
        value: 3,
        synced_at: Utc::now(),
    };
    db.upsert_insight(&insight).await.unwrap();
    insight.value = 7;
    db.upsert_insight(&insight).await.unwrap();
}

#[tokio::test]
async fn test_sync_job_insert_coalesces_pending_key() {
    let (db, _temp_dir) = create_test_db().await;

    let first = job("acct-1", "reviews", Some("loc-1"));
    assert!(db.insert_sync_job_unless_pending(&first).await.unwrap());

    let duplicate = job("acct-1", "reviews", Some("loc-1"));
    assert!(!db.insert_sync_job_unless_pending(&duplicate).await.unwrap());

    let active = db
        .get_pending_sync_job("acct-1", "reviews", Some("loc-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.id, first.id);

    // Different location, and account-wide (NULL location), are distinct keys
    assert!(db
        .insert_sync_job_unless_pending(&job("acct-1", "reviews", Some("loc-2")))
        .await
        .unwrap());
    assert!(db
        .insert_sync_job_unless_pending(&job("acct-1", "reviews", None))
        .await
        .unwrap());
    assert!(!db
        .insert_sync_job_unless_pending(&job("acct-1", "reviews", None))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_sync_job_insert_is_not_blocked_by_running_job() {
    let (db, _temp_dir) = create_test_db().await;

    let first = job("acct-1", "reviews", Some("loc-1"));
    assert!(db.insert_sync_job_unless_pending(&first).await.unwrap());
    let claimed = db
        .claim_next_sync_job(&JobClaimFilter::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, first.id);

    let follow_up = job("acct-1", "reviews", Some("loc-1"));
    assert!(db.insert_sync_job_unless_pending(&follow_up).await.unwrap());

    let pending = db
        .get_pending_sync_job("acct-1", "reviews", Some("loc-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.id, follow_up.id);
}

#[tokio::test]
async fn test_sync_job_insert_after_terminal_is_allowed() {
    let (db, _temp_dir) = create_test_db().await;

    let first = job("acct-1", "questions", None);
    db.insert_sync_job_unless_pending(&first).await.unwrap();
    db.update_sync_job_status(&first.id, JobStatus::Completed, None)
        .await
        .unwrap();

    assert!(db
        .insert_sync_job_unless_pending(&job("acct-1", "questions", None))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_claim_orders_by_priority_then_age() {
    let (db, _temp_dir) = create_test_db().await;
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let mut old_low = job("acct-1", "reviews", None);
    old_low.created_at = base;
    let mut new_high = job("acct-1", "questions", None);
    new_high.created_at = base + Duration::seconds(10);
    new_high.priority = 5;
    let mut old_high = job("acct-1", "posts", None);
    old_high.created_at = base + Duration::seconds(5);
    old_high.priority = 5;

    for j in [&old_low, &new_high, &old_high] {
        db.insert_sync_job_unless_pending(j).await.unwrap();
    }

    let filter = JobClaimFilter::default();
    let first = db.claim_next_sync_job(&filter).await.unwrap().unwrap();
    assert_eq!(first.id, old_high.id);
    assert_eq!(first.status, "running");
    assert_eq!(first.attempts, 1);
    assert!(first.started_at.is_some());

    let second = db.claim_next_sync_job(&filter).await.unwrap().unwrap();
    assert_eq!(second.id, new_high.id);
    let third = db.claim_next_sync_job(&filter).await.unwrap().unwrap();
    assert_eq!(third.id, old_low.id);
    assert!(db.claim_next_sync_job(&filter).await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_applies_filters() {
    let (db, _temp_dir) = create_test_db().await;
    db.insert_sync_job_unless_pending(&job("acct-1", "reviews", None))
        .await
        .unwrap();
    db.insert_sync_job_unless_pending(&job("acct-2", "media", None))
        .await
        .unwrap();

    let by_type = JobClaimFilter {
        account_id: None,
        job_types: vec!["media".to_string(), "posts".to_string()],
    };
    let claimed = db.claim_next_sync_job(&by_type).await.unwrap().unwrap();
    assert_eq!(claimed.account_id, "acct-2");

    let by_account = JobClaimFilter {
        account_id: Some("acct-3".to_string()),
        job_types: Vec::new(),
    };
    assert!(db.claim_next_sync_job(&by_account).await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_skips_exhausted_jobs() {
    let (db, _temp_dir) = create_test_db().await;
    let mut exhausted = job("acct-1", "reviews", None);
    exhausted.attempts = 3;
    db.insert_sync_job_unless_pending(&exhausted).await.unwrap();

    assert!(db
        .claim_next_sync_job(&JobClaimFilter::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_status_transitions_are_monotonic() {
    let (db, _temp_dir) = create_test_db().await;
    let j = job("acct-1", "reviews", None);
    db.insert_sync_job_unless_pending(&j).await.unwrap();

    assert!(db
        .update_sync_job_status(&j.id, JobStatus::Running, None)
        .await
        .unwrap());
    assert!(db
        .update_sync_job_status(&j.id, JobStatus::Failed, Some("boom"))
        .await
        .unwrap());

    // Terminal rows never move again
    assert!(!db
        .update_sync_job_status(&j.id, JobStatus::Completed, None)
        .await
        .unwrap());
    assert!(!db
        .update_sync_job_status(&j.id, JobStatus::Running, None)
        .await
        .unwrap());

    let stored = db.get_sync_job(&j.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Failed));
    assert_eq!(stored.message.as_deref(), Some("boom"));
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_requeue_failed_respects_attempt_budget() {
    let (db, _temp_dir) = create_test_db().await;
    let j = job("acct-1", "reviews", None);
    db.insert_sync_job_unless_pending(&j).await.unwrap();

    // Pending jobs are not requeued
    assert!(!db.requeue_failed_sync_job(&j.id).await.unwrap());

    let claimed = db
        .claim_next_sync_job(&JobClaimFilter::default())
        .await
        .unwrap()
        .unwrap();
    db.update_sync_job_status(&claimed.id, JobStatus::Failed, Some("boom"))
        .await
        .unwrap();
    assert!(db.requeue_failed_sync_job(&j.id).await.unwrap());

    let stored = db.get_sync_job(&j.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Pending));
    assert_eq!(stored.attempts, 1);

    let mut spent = job("acct-1", "posts", None);
    spent.attempts = 3;
    spent.status = JobStatus::Failed.as_str().to_string();
    db.insert_sync_job_unless_pending(&spent).await.unwrap();
    assert!(!db.requeue_failed_sync_job(&spent.id).await.unwrap());
}

#[tokio::test]
async fn test_jobs_for_account_newest_first() {
    let (db, _temp_dir) = create_test_db().await;
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let mut older = job("acct-1", "reviews", None);
    older.created_at = base;
    let mut newer = job("acct-1", "posts", None);
    newer.created_at = base + Duration::minutes(1);
    db.insert_sync_job_unless_pending(&older).await.unwrap();
    db.insert_sync_job_unless_pending(&newer).await.unwrap();
    db.insert_sync_job_unless_pending(&job("acct-2", "posts", None))
        .await
        .unwrap();

    let jobs = db.get_sync_jobs_for_account("acct-1", 10).await.unwrap();
    let ids: Vec<_> = jobs.iter().map(|j| j.id.clone()).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}

#[tokio::test]
async fn test_status_events_in_write_order() {
    let (db, _temp_dir) = create_test_db().await;
    let created_at = Utc::now();

    for (stage, status) in [("reviews", "running"), ("reviews", "completed")] {
        db.insert_sync_status_event(&SyncStatusEvent {
            id: EntityId::new().0,
            job_id: "job-1".to_string(),
            stage: stage.to_string(),
            status: status.to_string(),
            progress_current: 0,
            progress_total: 0,
            progress_percentage: 0,
            message: None,
            metadata: r#"{"job_type":"reviews"}"#.to_string(),
            created_at,
        })
        .await
        .unwrap();
    }

    let events = db.get_sync_status_events("job-1").await.unwrap();
    let statuses: Vec<_> = events.iter().map(|e| e.status.as_str()).collect();
    assert_eq!(statuses, vec!["running", "completed"]);
    assert_eq!(events[0].metadata_json()["job_type"], "reviews");
}

#[tokio::test]
async fn test_notification_audit_detects_redelivery() {
    let (db, _temp_dir) = create_test_db().await;
    let audit = NotificationAudit {
        message_id: "msg-1".to_string(),
        transport: "broker".to_string(),
        resource_name: Some("accounts/1/locations/2".to_string()),
        kinds: "NEW_REVIEW".to_string(),
        account_ref: Some("1".to_string()),
        location_ref: Some("2".to_string()),
        received_at: Utc::now(),
    };

    assert!(db.record_notification(&audit).await.unwrap());
    assert!(!db.record_notification(&audit).await.unwrap());
}
