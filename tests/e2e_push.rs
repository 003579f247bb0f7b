//! E2E tests for the broker push transport

mod common;

use base64::{Engine as _, engine::general_purpose};
use common::{PUBSUB_TOKEN, TestServer};
use listing_sync::sync::JobType;
use serde_json::{Value, json};

fn envelope(notification: Value, message_id: &str) -> Value {
    let data = general_purpose::STANDARD.encode(notification.to_string());
    json!({
        "message": {
            "data": data,
            "messageId": message_id,
            "publishTime": "2026-01-15T10:00:00Z",
            "attributes": {}
        },
        "subscription": "projects/demo/subscriptions/listing-sync"
    })
}

#[tokio::test]
async fn test_push_with_wrong_token_is_rejected() {
    let mut server = TestServer::new().await;
    let body = envelope(json!({"type": "NEW_REVIEW"}), "m-1");

    let response = server
        .client
        .post(server.url("/api/webhooks/pubsub?token=nope"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = server
        .client
        .post(server.url("/api/webhooks/pubsub"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(server.take_requests().is_empty());
}

#[tokio::test]
async fn test_push_question_enqueues_question_sync() {
    let mut server = TestServer::new().await;
    let account = server.create_account("acct-9", "user-9", true).await;
    let location = server.create_location("loc-9", &account, "900").await;

    let body = envelope(
        json!({
            "notificationTypes": ["NEW_QUESTION", "NEW_ANSWER"],
            "question": "accounts/acct-9/locations/900/questions/q-1"
        }),
        "push-1",
    );

    let response = server
        .client
        .post(server.url(&format!("/api/webhooks/pubsub?token={PUBSUB_TOKEN}")))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let ack: Value = response.json().await.unwrap();
    assert_eq!(ack["received"], true);
    assert_eq!(ack["messageId"], "push-1");
    assert_eq!(ack["processed"].as_array().unwrap().len(), 2);
    assert_eq!(ack["processed"][0]["status"], "sync_requested");
    assert_eq!(ack["processed"][0]["jobType"], "questions");

    let requests = server.take_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.types == vec![JobType::Questions]));
    assert!(requests.iter().all(|r| r.trigger_source == "pubsub"));
    assert!(
        requests
            .iter()
            .all(|r| r.location_id.as_deref() == Some(location.id.as_str()))
    );

    // Both tags coalesce into one pending job
    for request in &requests {
        server.state.queue.enqueue_request(request).await.unwrap();
    }
    let jobs = server
        .state
        .queue
        .list_jobs_for_account(&account.id, 10)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, "questions");
}

#[tokio::test]
async fn test_push_redelivery_is_reported_as_duplicate() {
    let mut server = TestServer::new().await;
    let account = server.create_account("acct-9", "user-9", true).await;
    server.create_location("loc-9", &account, "900").await;

    let body = envelope(
        json!({
            "type": "UPDATED_REVIEW",
            "review": "accounts/acct-9/locations/900/reviews/r-7"
        }),
        "push-dup",
    );
    let url = server.url(&format!("/api/webhooks/pubsub?token={PUBSUB_TOKEN}"));

    let first: Value = server
        .client
        .post(&url)
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["processed"][0]["status"], "sync_requested");

    let second: Value = server
        .client
        .post(&url)
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["processed"][0]["status"], "duplicate");

    assert_eq!(server.take_requests().len(), 1);
}

#[tokio::test]
async fn test_push_with_undecodable_data_is_acknowledged() {
    let mut server = TestServer::new().await;

    let response = server
        .client
        .post(server.url(&format!("/api/webhooks/pubsub?token={PUBSUB_TOKEN}")))
        .json(&json!({"message": {"data": "%%% not base64 %%%", "messageId": "m-bad"}}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let ack: Value = response.json().await.unwrap();
    assert_eq!(ack["received"], true);
    assert_eq!(ack["messageId"], "m-bad");
    assert_eq!(ack["errors"][0]["kind"], "parse_failed");
    assert!(server.take_requests().is_empty());
}

#[tokio::test]
async fn test_push_with_unknown_type_is_ignored() {
    let mut server = TestServer::new().await;
    let account = server.create_account("acct-9", "user-9", true).await;
    server.create_location("loc-9", &account, "900").await;

    let body = envelope(
        json!({
            "type": "GOOGLE_UPDATE",
            "location": "accounts/acct-9/locations/900"
        }),
        "push-ignored",
    );

    let response = server
        .client
        .post(server.url(&format!("/api/webhooks/pubsub?token={PUBSUB_TOKEN}")))
        .json(&body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let ack: Value = response.json().await.unwrap();
    assert_eq!(ack["processed"][0]["kind"], "GOOGLE_UPDATE");
    assert_eq!(ack["processed"][0]["status"], "ignored");
    assert!(server.take_requests().is_empty());
}
