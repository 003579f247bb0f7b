//! Authentication middleware
//!
//! Protects routes that require the internal bearer token.

use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use crate::AppState;
use crate::error::AppError;
use crate::ingest::tokens_match;

fn extract_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Middleware to require the internal token
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/sync/trigger", ...)
///     .route_layer(middleware::from_fn_with_state(state, require_internal_auth));
/// ```
pub async fn require_internal_auth(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token_from_headers(request.headers()).ok_or(AppError::Unauthorized)?;
    if !tokens_match(&state.config.api.internal_token, token) {
        tracing::warn!(path = %request.uri().path(), "Rejected internal API call with invalid token");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token_from_headers(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc "));
        assert_eq!(extract_token_from_headers(&headers), Some("abc"));

        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_token_from_headers(&headers), None);
    }
}
