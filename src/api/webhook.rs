//! Push notification endpoints
//!
//! Both transports acknowledge every syntactically acceptable request with
//! 200 so the provider does not start redelivering. Only authentication
//! (401), throttling (429) and oversized bodies (413) fail.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::Response,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::limit::RequestBodyLimitLayer;

use crate::AppState;
use crate::error::AppError;
use crate::ingest::{
    IngestReport, PushEnvelope, SIGNATURE_HEADER, Transport, parse_direct, tokens_match,
    verify_signature,
};
use crate::metrics::NOTIFICATIONS_RECEIVED_TOTAL;

/// Header carrying the provider message id on the direct transport
const MESSAGE_ID_HEADER: &str = "x-message-id";

/// Create the webhook router
///
/// Routes:
/// - POST /api/webhooks/gmb
/// - GET /api/webhooks/gmb
/// - POST /api/webhooks/pubsub
pub fn webhook_router(state: AppState) -> Router<AppState> {
    let max_body_bytes = state.config.webhook.max_body_bytes;

    Router::new()
        .route(
            "/api/webhooks/gmb",
            post(receive_webhook).get(verify_endpoint),
        )
        .route("/api/webhooks/pubsub", post(receive_push))
        .layer(middleware::from_fn_with_state(state, throttle_by_client))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

/// Client address used as the rate limit key
///
/// Proxy headers win over the socket peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
        .map(ToOwned::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn throttle_by_client(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    if let Err(e) = state.rate_limiter.check_and_increment(&key).await {
        NOTIFICATIONS_RECEIVED_TOTAL
            .with_label_values(&["any", "throttled"])
            .inc();
        tracing::warn!(client = %key, path = %request.uri().path(), "Throttled notification");
        return Err(e);
    }

    Ok(next.run(request).await)
}

/// POST /api/webhooks/gmb
async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestReport>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(e) = verify_signature(&state.config.webhook.secret, &body, signature) {
        NOTIFICATIONS_RECEIVED_TOTAL
            .with_label_values(&[Transport::Direct.as_str(), "rejected"])
            .inc();
        tracing::warn!(has_signature = signature.is_some(), "Rejected webhook with bad signature");
        return Err(e);
    }

    let message_id = headers
        .get(MESSAGE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned);

    let report = match parse_direct(&body, message_id) {
        Ok(message) => state.processor.process(&message).await,
        Err(e) => IngestReport::parse_failed(Transport::Direct, e),
    };

    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    challenge: Option<String>,
    verify_token: Option<String>,
}

/// GET /api/webhooks/gmb
///
/// One-time endpoint verification handshake.
async fn verify_endpoint(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Result<String, AppError> {
    let token = params.verify_token.as_deref().unwrap_or_default();
    match params.challenge {
        Some(challenge) if tokens_match(&state.config.webhook.verify_token, token) => {
            tracing::info!("Webhook endpoint verified");
            Ok(challenge)
        }
        _ => Err(AppError::Forbidden),
    }
}

#[derive(Debug, Deserialize)]
struct PushParams {
    token: Option<String>,
}

/// Broker push acknowledgement
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushAck {
    received: bool,
    message_id: Option<String>,
    #[serde(flatten)]
    report: IngestReport,
}

/// POST /api/webhooks/pubsub
async fn receive_push(
    State(state): State<AppState>,
    Query(params): Query<PushParams>,
    body: Bytes,
) -> Result<Json<PushAck>, AppError> {
    let token = params.token.as_deref().unwrap_or_default();
    if !tokens_match(&state.config.webhook.pubsub_token, token) {
        NOTIFICATIONS_RECEIVED_TOTAL
            .with_label_values(&[Transport::Broker.as_str(), "rejected"])
            .inc();
        tracing::warn!("Rejected push with bad token");
        return Err(AppError::Unauthorized);
    }

    let envelope = match PushEnvelope::parse(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Ok(Json(PushAck {
                received: true,
                message_id: None,
                report: IngestReport::parse_failed(Transport::Broker, e),
            }));
        }
    };

    let report = match envelope.notification() {
        Ok(message) => state.processor.process(&message).await,
        Err(e) => IngestReport::parse_failed(Transport::Broker, e),
    };

    Ok(Json(PushAck {
        received: true,
        message_id: envelope.message.message_id,
        report,
    }))
}
