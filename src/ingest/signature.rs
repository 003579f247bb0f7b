//! Notification authentication
//!
//! Direct webhooks carry an HMAC-SHA256 of the raw body in
//! `x-webhook-signature`; broker pushes carry a shared token in the query
//! string. Both comparisons are constant time.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Hex HMAC-SHA256 of `body`
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a signature header value against `body`
///
/// Accepts bare hex or `sha256=<hex>`.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), AppError> {
    let header = header.ok_or(AppError::InvalidSignature)?.trim();
    let hex_signature = header.strip_prefix("sha256=").unwrap_or(header);
    let signature = hex::decode(hex_signature).map_err(|_| AppError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| AppError::InvalidSignature)
}

/// Constant-time equality of two shared tokens
///
/// Both sides are hashed first so the comparison time does not depend on
/// where they differ or on their lengths.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "webhook-secret-0123456789";

    #[test]
    fn accepts_bare_and_prefixed_signatures() {
        let body = br#"{"type":"NEW_REVIEW"}"#;
        let signature = sign_body(SECRET, body).unwrap();

        assert!(verify_signature(SECRET, body, Some(&signature)).is_ok());
        assert!(verify_signature(SECRET, body, Some(&format!("sha256={signature}"))).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let signature = sign_body(SECRET, br#"{"type":"NEW_REVIEW"}"#).unwrap();
        let result = verify_signature(SECRET, br#"{"type":"NEW_ANSWER"}"#, Some(&signature));
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn rejects_missing_or_malformed_header() {
        assert!(matches!(
            verify_signature(SECRET, b"{}", None),
            Err(AppError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature(SECRET, b"{}", Some("sha256=not-hex")),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("pubsub-token", "pubsub-token"));
        assert!(!tokens_match("pubsub-token", "pubsub-tokem"));
        assert!(!tokens_match("pubsub-token", ""));
        assert!(!tokens_match("", ""));
    }
}
