//! E2E tests for the direct webhook transport

mod common;

use common::{TestServer, VERIFY_TOKEN, WEBHOOK_SECRET};
use listing_sync::ingest::sign_body;
use listing_sync::sync::{DequeueCriteria, JobType};
use serde_json::Value;

const NEW_REVIEW: &str =
    r#"{"type":"NEW_REVIEW","review":"accounts/acct-1/locations/200/reviews/r-1"}"#;

#[tokio::test]
async fn test_signed_new_review_enqueues_one_incremental_review_sync() {
    let mut server = TestServer::new().await;
    let account = server.create_account("acct-1", "user-1", true).await;
    let location = server.create_location("loc-1", &account, "200").await;

    let response = server.post_signed_webhook(NEW_REVIEW).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["processed"][0]["status"], "sync_requested");
    assert!(body.get("errors").is_none());

    let requests = server.take_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].types, vec![JobType::Reviews]);
    assert!(requests[0].incremental);
    assert_eq!(requests[0].account_id, account.id);
    assert_eq!(requests[0].location_id.as_deref(), Some(location.id.as_str()));

    for request in requests {
        server.state.queue.enqueue_request(&request).await.unwrap();
    }
    let jobs = server
        .state
        .queue
        .list_jobs_for_account(&account.id, 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, "reviews");
    assert_eq!(jobs[0].location_id.as_deref(), Some("loc-1"));
    assert!(jobs[0].is_incremental());
}

#[tokio::test]
async fn test_tampered_body_is_rejected_without_enqueue() {
    let mut server = TestServer::new().await;
    let account = server.create_account("acct-1", "user-1", true).await;
    server.create_location("loc-1", &account, "200").await;

    let signature = sign_body(WEBHOOK_SECRET, NEW_REVIEW.as_bytes()).unwrap();
    let tampered = NEW_REVIEW.replace("r-1", "r-2");

    let response = server
        .client
        .post(server.url("/api/webhooks/gmb"))
        .header("x-webhook-signature", signature)
        .body(tampered)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert!(server.pump_requests().await.is_empty());
    assert!(
        server
            .state
            .queue
            .dequeue(&DequeueCriteria::default())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let mut server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/api/webhooks/gmb"))
        .body(NEW_REVIEW)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert!(server.take_requests().is_empty());
}

#[tokio::test]
async fn test_unknown_location_is_acknowledged_without_sync() {
    let mut server = TestServer::new().await;
    server.create_account("acct-1", "user-1", true).await;

    let response = server.post_signed_webhook(NEW_REVIEW).await;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["processed"][0]["status"], "location_not_synced");
    assert!(server.take_requests().is_empty());
}

#[tokio::test]
async fn test_unparseable_resource_is_a_warning() {
    let mut server = TestServer::new().await;

    let response = server
        .post_signed_webhook(r#"{"type":"NEW_REVIEW","name":"reviews/r-1"}"#)
        .await;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["processed"][0]["status"], "warning");
    assert!(server.take_requests().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_acknowledged_as_parse_failure() {
    let mut server = TestServer::new().await;

    let response = server.post_signed_webhook("{not json").await;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["kind"], "parse_failed");
    assert_eq!(body["processed"], Value::Array(Vec::new()));
    assert!(server.take_requests().is_empty());
}

#[tokio::test]
async fn test_redelivered_message_id_is_not_dispatched_twice() {
    let mut server = TestServer::new().await;
    let account = server.create_account("acct-1", "user-1", true).await;
    server.create_location("loc-1", &account, "200").await;

    let signature = sign_body(WEBHOOK_SECRET, NEW_REVIEW.as_bytes()).unwrap();
    for _ in 0..2 {
        let response = server
            .client
            .post(server.url("/api/webhooks/gmb"))
            .header("x-webhook-signature", &signature)
            .header("x-message-id", "provider-msg-1")
            .body(NEW_REVIEW)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    assert_eq!(server.take_requests().len(), 1);
}

#[tokio::test]
async fn test_verification_echoes_challenge() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url(&format!(
            "/api/webhooks/gmb?challenge=abc123&verify_token={VERIFY_TOKEN}"
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(response.text().await.unwrap(), "abc123");

    let response = server
        .client
        .get(server.url("/api/webhooks/gmb?challenge=abc123&verify_token=wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let server = TestServer::with_config(|config| config.webhook.max_body_bytes = 256).await;
    let body = format!(r#"{{"type":"NEW_REVIEW","padding":"{}"}}"#, "x".repeat(1024));

    let response = server.post_signed_webhook(&body).await;

    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn test_throttled_client_gets_retry_after() {
    let server = TestServer::with_config(|config| {
        config.webhook.rate_limit_max_requests = 2;
        config.webhook.rate_limit_window_secs = 60;
    })
    .await;

    for _ in 0..2 {
        let response = server.post_signed_webhook(NEW_REVIEW).await;
        assert_eq!(response.status(), 200);
    }

    let response = server.post_signed_webhook(NEW_REVIEW).await;
    assert_eq!(response.status(), 429);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);

    // Another client address has its own budget
    let signature = sign_body(WEBHOOK_SECRET, NEW_REVIEW.as_bytes()).unwrap();
    let response = server
        .client
        .post(server.url("/api/webhooks/gmb"))
        .header("x-webhook-signature", signature)
        .header("x-forwarded-for", "203.0.113.50")
        .body(NEW_REVIEW)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}
