//! Push notification ingestion
//!
//! Authentication, throttling, parsing and dispatch of provider change
//! notifications. The HTTP handlers in [`crate::api`] glue these together.

mod notification;
mod processor;
mod rate_limit;
mod signature;

pub use notification::{
    NotificationKind, NotificationMessage, ParseError, PushEnvelope, PushMessage, ResourceRef,
    Transport, parse_direct,
};
pub use processor::{IngestError, IngestReport, NotificationProcessor, ProcessedEntry};
pub use rate_limit::{RateLimitStats, RateLimiter};
pub use signature::{SIGNATURE_HEADER, sign_body, tokens_match, verify_signature};
