//! Provider notification parsing
//!
//! Both transports end up as a [`NotificationMessage`]. The broker wraps
//! the provider JSON in an envelope whose `message.data` is base64.

use base64::{Engine as _, engine::general_purpose};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::sync::JobType;

lazy_static! {
    static ref RESOURCE_PATTERN: Regex =
        Regex::new(r"accounts/([^/]+)/locations/([^/]+)").expect("resource pattern compiles");
}

/// How a notification reached us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Signed POST straight from the provider
    Direct,
    /// Push delivery through the message broker
    Broker,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Direct => "webhook",
            Transport::Broker => "pubsub",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    NewReview,
    UpdatedReview,
    NewQuestion,
    UpdatedQuestion,
    NewAnswer,
    UpdatedAnswer,
    VerificationChanged,
    Media,
    Unknown(String),
}

impl NotificationKind {
    pub fn parse(tag: &str) -> Self {
        match tag.trim() {
            "NEW_REVIEW" => NotificationKind::NewReview,
            "UPDATED_REVIEW" => NotificationKind::UpdatedReview,
            "NEW_QUESTION" => NotificationKind::NewQuestion,
            "UPDATED_QUESTION" => NotificationKind::UpdatedQuestion,
            "NEW_ANSWER" => NotificationKind::NewAnswer,
            "UPDATED_ANSWER" => NotificationKind::UpdatedAnswer,
            "VOICE_OF_MERCHANT_UPDATED" | "VERIFICATION_CHANGED" => {
                NotificationKind::VerificationChanged
            }
            "NEW_CUSTOMER_MEDIA" | "MEDIA_FLAGGED" => NotificationKind::Media,
            other => NotificationKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::NewReview => "NEW_REVIEW",
            NotificationKind::UpdatedReview => "UPDATED_REVIEW",
            NotificationKind::NewQuestion => "NEW_QUESTION",
            NotificationKind::UpdatedQuestion => "UPDATED_QUESTION",
            NotificationKind::NewAnswer => "NEW_ANSWER",
            NotificationKind::UpdatedAnswer => "UPDATED_ANSWER",
            NotificationKind::VerificationChanged => "VERIFICATION_CHANGED",
            NotificationKind::Media => "MEDIA",
            NotificationKind::Unknown(tag) => tag,
        }
    }

    /// Entity type to resync, `None` for tags we do not act on
    pub fn job_type(&self) -> Option<JobType> {
        match self {
            NotificationKind::NewReview | NotificationKind::UpdatedReview => Some(JobType::Reviews),
            NotificationKind::NewQuestion
            | NotificationKind::UpdatedQuestion
            | NotificationKind::NewAnswer
            | NotificationKind::UpdatedAnswer => Some(JobType::Questions),
            NotificationKind::VerificationChanged => Some(JobType::Locations),
            NotificationKind::Media => Some(JobType::Media),
            NotificationKind::Unknown(_) => None,
        }
    }
}

/// Provider account and location ids named by a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub account_id: String,
    pub location_id: String,
}

impl ResourceRef {
    pub fn extract(resource_name: &str) -> Option<Self> {
        let captures = RESOURCE_PATTERN.captures(resource_name)?;
        Some(Self {
            account_id: captures[1].to_string(),
            location_id: captures[2].to_string(),
        })
    }

    /// `accounts/{a}/locations/{l}`, the key locations are stored under
    pub fn location_resource_name(&self) -> String {
        format!("accounts/{}/locations/{}", self.account_id, self.location_id)
    }
}

/// Normalized notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub resource_name: Option<String>,
    pub kinds: Vec<NotificationKind>,
    pub resource: Option<ResourceRef>,
    /// Provider-assigned id used for dedup
    pub message_id: Option<String>,
    pub transport: Transport,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("push envelope has no message data")]
    MissingData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotification {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    notification_types: Vec<String>,
    resource_name: Option<String>,
    name: Option<String>,
    location: Option<String>,
    review: Option<String>,
    question: Option<String>,
    answer: Option<String>,
    media: Option<String>,
}

impl RawNotification {
    fn into_message(self, message_id: Option<String>, transport: Transport) -> NotificationMessage {
        let resource_name = [
            self.answer,
            self.question,
            self.review,
            self.media,
            self.location,
            self.name,
            self.resource_name,
        ]
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty());

        let mut kinds: Vec<NotificationKind> = Vec::new();
        for tag in self.kind.into_iter().chain(self.notification_types) {
            let kind = NotificationKind::parse(&tag);
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }

        NotificationMessage {
            resource: resource_name.as_deref().and_then(ResourceRef::extract),
            resource_name,
            kinds,
            message_id,
            transport,
        }
    }
}

/// Parse a direct webhook body
pub fn parse_direct(body: &[u8], message_id: Option<String>) -> Result<NotificationMessage, ParseError> {
    let raw: RawNotification = serde_json::from_slice(body)?;
    Ok(raw.into_message(message_id, Transport::Direct))
}

/// Broker push envelope
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub publish_time: Option<String>,
    #[serde(default)]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

impl PushEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Decode the wrapped provider notification
    pub fn notification(&self) -> Result<NotificationMessage, ParseError> {
        let data = self
            .message
            .data
            .as_deref()
            .filter(|data| !data.is_empty())
            .ok_or(ParseError::MissingData)?;
        let decoded = general_purpose::STANDARD.decode(data.trim())?;
        let raw: RawNotification = serde_json::from_slice(&decoded)?;
        Ok(raw.into_message(self.message.message_id.clone(), Transport::Broker))
    }
}
