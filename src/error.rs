//! Error types for listing-sync
//!
//! Errors surfaced over HTTP are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Provider and job-level failures have their own types so they never
//! leak into a webhook acknowledgement.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// This enum represents every error that can reach the HTTP surface.
/// It implements `IntoResponse` to automatically convert errors to
/// appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Signature verification failed (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limit exceeded (429)
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Seconds until the caller may retry
        retry_after_secs: u64,
    },

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string(), "unauthorized"),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                "invalid_signature",
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string(), "forbidden"),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                self.to_string(),
                "rate_limited",
            ),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string(), "http_client"),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                "database",
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        };

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[error_type]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        let mut response = (status, body).into_response();
        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure of a single call against the external listing provider.
///
/// The retry policy inspects these to decide whether another attempt
/// is worthwhile.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The provider answered with a non-success HTTP status
    #[error("provider returned HTTP {status}: {message}")]
    Status {
        status: u16,
        /// Parsed `Retry-After` header, in seconds
        retry_after: Option<u64>,
        message: String,
    },

    /// The request never produced a response (connect, timeout, TLS)
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape
    #[error("failed to decode provider response: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the error is transient and worth another attempt
    ///
    /// 429 and 5xx are transient, transport failures too.
    /// Every other 4xx is permanent, as are decode failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ApiError::Transport(_) => true,
            ApiError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Failure of a sync job handler.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote call failed after the retry policy gave up
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Reading or persisting local state failed
    #[error(transparent)]
    Storage(#[from] AppError),

    /// A local row the job refers to does not exist
    #[error("{0}")]
    Missing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            status: code,
            retry_after: None,
            message: String::new(),
        }
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert!(status(429).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(ApiError::Transport("reset".to_string()).is_retryable());
    }

    #[test]
    fn client_errors_are_permanent() {
        for code in [400, 401, 403, 404, 409, 422] {
            assert!(!status(code).is_retryable(), "{code} must not retry");
        }
        assert!(!ApiError::Decode("bad json".to_string()).is_retryable());
    }

    #[test]
    fn rate_limited_response_sets_retry_after_header() {
        let response = AppError::RateLimited {
            retry_after_secs: 17,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "17");
    }
}
