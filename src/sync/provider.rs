//! Listing provider API client
//!
//! Typed access to the provider endpoints used by the sync handlers.
//! Every call returns one page; paging and retries are the caller's job.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::data::{Account, Location};
use crate::error::ApiError;

/// Daily metrics fetched by insight syncs
pub const DAILY_METRICS: [&str; 6] = [
    "BUSINESS_IMPRESSIONS_DESKTOP_SEARCH",
    "BUSINESS_IMPRESSIONS_MOBILE_SEARCH",
    "BUSINESS_DIRECTION_REQUESTS",
    "CALL_CLICKS",
    "WEBSITE_CLICKS",
    "BUSINESS_CONVERSATIONS",
];

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteLocation {
    /// Full resource path, "accounts/{a}/locations/{l}"
    pub resource_name: String,
    pub title: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub verification_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteReview {
    pub resource_name: String,
    pub reviewer_name: Option<String>,
    pub star_rating: Option<i64>,
    pub comment: Option<String>,
    pub reply_comment: Option<String>,
    pub reply_updated_at: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuestion {
    pub resource_name: String,
    pub author_name: Option<String>,
    pub text: String,
    pub upvote_count: i64,
    pub answer_count: i64,
    pub top_answer: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemotePost {
    pub resource_name: String,
    pub topic_type: Option<String>,
    pub summary: Option<String>,
    pub state: Option<String>,
    pub search_url: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMediaItem {
    pub resource_name: String,
    pub media_format: Option<String>,
    pub category: Option<String>,
    pub google_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyMetricValue {
    pub metric: String,
    pub date: NaiveDate,
    pub value: i64,
}

/// Provider operations used by the sync handlers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn list_locations(
        &self,
        account: &Account,
        page_token: Option<String>,
    ) -> Result<Page<RemoteLocation>, ApiError>;

    async fn list_reviews(
        &self,
        account: &Account,
        location: &Location,
        page_token: Option<String>,
    ) -> Result<Page<RemoteReview>, ApiError>;

    async fn list_questions(
        &self,
        account: &Account,
        location: &Location,
        page_token: Option<String>,
    ) -> Result<Page<RemoteQuestion>, ApiError>;

    async fn list_posts(
        &self,
        account: &Account,
        location: &Location,
        page_token: Option<String>,
    ) -> Result<Page<RemotePost>, ApiError>;

    async fn list_media(
        &self,
        account: &Account,
        location: &Location,
        page_token: Option<String>,
    ) -> Result<Page<RemoteMediaItem>, ApiError>;

    /// Daily values of one metric over `[start, end]`
    async fn fetch_daily_metric(
        &self,
        account: &Account,
        location: &Location,
        metric: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetricValue>, ApiError>;
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// Google Business Profile client
pub struct GoogleBusinessClient {
    http: reqwest::Client,
    account_api_base_url: String,
    business_api_base_url: String,
    performance_api_base_url: String,
    page_size: u32,
    timeout: Duration,
}

impl GoogleBusinessClient {
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Self {
        Self {
            http,
            account_api_base_url: config.account_api_base_url.trim_end_matches('/').to_string(),
            business_api_base_url: config.business_api_base_url.trim_end_matches('/').to_string(),
            performance_api_base_url: config
                .performance_api_base_url
                .trim_end_matches('/')
                .to_string(),
            page_size: config.page_size,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn authorized(&self, account: &Account, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = account
            .access_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Status {
                status: 401,
                retry_after: None,
                message: format!("account {} has no access token", account.id),
            })?;

        Ok(request.bearer_auth(token).timeout(self.timeout))
    }

    fn paged(&self, request: RequestBuilder, page_token: Option<String>) -> RequestBuilder {
        let request = request.query(&[("pageSize", self.page_size.to_string())]);
        match page_token {
            Some(token) => request.query(&[("pageToken", token)]),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &body));
        }

        response.json::<T>().await.map_err(ApiError::from)
    }
}

/// Longest provider-requested wait honoured before a retry
const MAX_RETRY_AFTER_SECS: u64 = 300;

/// Read a `Retry-After` header, capped at [`MAX_RETRY_AFTER_SECS`]
///
/// Values that are neither delta-seconds nor an HTTP-date are logged and
/// ignored, leaving the retry policy on exponential backoff.
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    let raw = value?.to_str().ok()?.trim();

    let Some(seconds) = retry_after_secs(raw, Utc::now()) else {
        tracing::warn!(retry_after = raw, "Ignoring unparseable Retry-After header");
        return None;
    };

    if seconds > MAX_RETRY_AFTER_SECS {
        tracing::warn!(
            requested_secs = seconds,
            capped_secs = MAX_RETRY_AFTER_SECS,
            "Capping provider Retry-After"
        );
        return Some(MAX_RETRY_AFTER_SECS);
    }
    Some(seconds)
}

/// Seconds to wait for a delta-seconds or HTTP-date `Retry-After` value
fn retry_after_secs(raw: &str, now: DateTime<Utc>) -> Option<u64> {
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds);
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?;
    let wait = at.with_timezone(&Utc) - now;
    Some(u64::try_from(wait.num_seconds()).unwrap_or(0))
}

fn status_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ApiError {
    let mut message: String = body.chars().take(512).collect();
    if message.is_empty() {
        message = status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string();
    }
    ApiError::Status {
        status: status.as_u16(),
        retry_after,
        message,
    }
}

fn star_rating(value: Option<&str>) -> Option<i64> {
    match value? {
        "ONE" => Some(1),
        "TWO" => Some(2),
        "THREE" => Some(3),
        "FOUR" => Some(4),
        "FIVE" => Some(5),
        _ => None,
    }
}

/// Location names come back either relative ("locations/456") or full
fn full_location_name(account: &Account, name: &str) -> String {
    if name.starts_with("accounts/") {
        name.to_string()
    } else {
        format!("{}/{}", account.provider_account_name, name)
    }
}

/// "accounts/1/locations/2" -> "locations/2"
fn short_location_name(location: &Location) -> &str {
    location
        .resource_name
        .find("locations/")
        .map(|index| &location.resource_name[index..])
        .unwrap_or(&location.resource_name)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationsResponse {
    #[serde(default)]
    locations: Vec<WireLocation>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLocation {
    name: String,
    #[serde(default)]
    title: String,
    storefront_address: Option<WireAddress>,
    phone_numbers: Option<WirePhoneNumbers>,
    website_uri: Option<String>,
    metadata: Option<WireLocationMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAddress {
    #[serde(default)]
    address_lines: Vec<String>,
    locality: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePhoneNumbers {
    primary_phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLocationMetadata {
    has_voice_of_merchant: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewsResponse {
    #[serde(default)]
    reviews: Vec<WireReview>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReview {
    name: String,
    reviewer: Option<Person>,
    star_rating: Option<String>,
    comment: Option<String>,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
    review_reply: Option<WireReply>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReply {
    comment: Option<String>,
    update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionsResponse {
    #[serde(default)]
    questions: Vec<WireQuestion>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuestion {
    name: String,
    author: Option<Person>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    upvote_count: i64,
    #[serde(default)]
    total_answer_count: i64,
    #[serde(default)]
    top_answers: Vec<WireAnswer>,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WireAnswer {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostsResponse {
    #[serde(default)]
    local_posts: Vec<WirePost>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePost {
    name: String,
    topic_type: Option<String>,
    summary: Option<String>,
    state: Option<String>,
    search_url: Option<String>,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaResponse {
    #[serde(default)]
    media_items: Vec<WireMediaItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMediaItem {
    name: String,
    media_format: Option<String>,
    location_association: Option<WireLocationAssociation>,
    google_url: Option<String>,
    thumbnail_url: Option<String>,
    create_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WireLocationAssociation {
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricResponse {
    time_series: Option<WireTimeSeries>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTimeSeries {
    #[serde(default)]
    dated_values: Vec<WireDatedValue>,
}

#[derive(Debug, Deserialize)]
struct WireDatedValue {
    date: WireDate,
    /// int64 encoded as a JSON string; absent means zero
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDate {
    year: i32,
    month: u32,
    day: u32,
}

#[async_trait]
impl ProviderApi for GoogleBusinessClient {
    async fn list_locations(
        &self,
        account: &Account,
        page_token: Option<String>,
    ) -> Result<Page<RemoteLocation>, ApiError> {
        let url = format!(
            "{}/{}/locations",
            self.account_api_base_url, account.provider_account_name
        );
        let request = self.authorized(account, self.http.get(url))?.query(&[(
            "readMask",
            "name,title,storefrontAddress,phoneNumbers,websiteUri,metadata",
        )]);
        let response: LocationsResponse = self.send_json(self.paged(request, page_token)).await?;

        let items = response
            .locations
            .into_iter()
            .map(|location| {
                let address = location.storefront_address.map(|address| {
                    let mut parts = address.address_lines;
                    parts.extend(address.locality);
                    parts.join(", ")
                });
                RemoteLocation {
                    resource_name: full_location_name(account, &location.name),
                    title: location.title,
                    address,
                    phone: location.phone_numbers.and_then(|p| p.primary_phone),
                    website: location.website_uri,
                    verification_state: location
                        .metadata
                        .and_then(|m| m.has_voice_of_merchant)
                        .map(|verified| (if verified { "VERIFIED" } else { "UNVERIFIED" }).to_string()),
                }
            })
            .collect();

        Ok(Page {
            items,
            next_page_token: response.next_page_token,
        })
    }

    async fn list_reviews(
        &self,
        account: &Account,
        location: &Location,
        page_token: Option<String>,
    ) -> Result<Page<RemoteReview>, ApiError> {
        let url = format!("{}/{}/reviews", self.business_api_base_url, location.resource_name);
        let request = self
            .authorized(account, self.http.get(url))?
            .query(&[("orderBy", "updateTime desc")]);
        let response: ReviewsResponse = self.send_json(self.paged(request, page_token)).await?;

        let items = response
            .reviews
            .into_iter()
            .map(|review| RemoteReview {
                resource_name: review.name,
                reviewer_name: review.reviewer.and_then(|r| r.display_name),
                star_rating: star_rating(review.star_rating.as_deref()),
                comment: review.comment,
                reply_comment: review.review_reply.as_ref().and_then(|r| r.comment.clone()),
                reply_updated_at: review.review_reply.and_then(|r| r.update_time),
                create_time: review.create_time,
                update_time: review.update_time,
            })
            .collect();

        Ok(Page {
            items,
            next_page_token: response.next_page_token,
        })
    }

    async fn list_questions(
        &self,
        account: &Account,
        location: &Location,
        page_token: Option<String>,
    ) -> Result<Page<RemoteQuestion>, ApiError> {
        let url = format!("{}/{}/questions", self.business_api_base_url, location.resource_name);
        let request = self
            .authorized(account, self.http.get(url))?
            .query(&[("orderBy", "updateTime desc"), ("answersPerQuestion", "1")]);
        let response: QuestionsResponse = self.send_json(self.paged(request, page_token)).await?;

        let items = response
            .questions
            .into_iter()
            .map(|question| RemoteQuestion {
                resource_name: question.name,
                author_name: question.author.and_then(|a| a.display_name),
                text: question.text,
                upvote_count: question.upvote_count,
                answer_count: question.total_answer_count,
                top_answer: question.top_answers.into_iter().find_map(|a| a.text),
                create_time: question.create_time,
                update_time: question.update_time,
            })
            .collect();

        Ok(Page {
            items,
            next_page_token: response.next_page_token,
        })
    }

    async fn list_posts(
        &self,
        account: &Account,
        location: &Location,
        page_token: Option<String>,
    ) -> Result<Page<RemotePost>, ApiError> {
        let url = format!("{}/{}/localPosts", self.business_api_base_url, location.resource_name);
        let request = self.authorized(account, self.http.get(url))?;
        let response: PostsResponse = self.send_json(self.paged(request, page_token)).await?;

        let items = response
            .local_posts
            .into_iter()
            .map(|post| RemotePost {
                resource_name: post.name,
                topic_type: post.topic_type,
                summary: post.summary,
                state: post.state,
                search_url: post.search_url,
                create_time: post.create_time,
                update_time: post.update_time,
            })
            .collect();

        Ok(Page {
            items,
            next_page_token: response.next_page_token,
        })
    }

    async fn list_media(
        &self,
        account: &Account,
        location: &Location,
        page_token: Option<String>,
    ) -> Result<Page<RemoteMediaItem>, ApiError> {
        let url = format!("{}/{}/media", self.business_api_base_url, location.resource_name);
        let request = self.authorized(account, self.http.get(url))?;
        let response: MediaResponse = self.send_json(self.paged(request, page_token)).await?;

        let items = response
            .media_items
            .into_iter()
            .map(|item| RemoteMediaItem {
                resource_name: item.name,
                media_format: item.media_format,
                category: item.location_association.and_then(|a| a.category),
                google_url: item.google_url,
                thumbnail_url: item.thumbnail_url,
                create_time: item.create_time,
            })
            .collect();

        Ok(Page {
            items,
            next_page_token: response.next_page_token,
        })
    }

    async fn fetch_daily_metric(
        &self,
        account: &Account,
        location: &Location,
        metric: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyMetricValue>, ApiError> {
        let url = format!(
            "{}/{}:getDailyMetricsTimeSeries",
            self.performance_api_base_url,
            short_location_name(location)
        );
        let request = self.authorized(account, self.http.get(url))?.query(&[
            ("dailyMetric", metric.to_string()),
            ("dailyRange.startDate.year", start.year().to_string()),
            ("dailyRange.startDate.month", start.month().to_string()),
            ("dailyRange.startDate.day", start.day().to_string()),
            ("dailyRange.endDate.year", end.year().to_string()),
            ("dailyRange.endDate.month", end.month().to_string()),
            ("dailyRange.endDate.day", end.day().to_string()),
        ]);
        let response: MetricResponse = self.send_json(request).await?;

        let values = response
            .time_series
            .map(|series| series.dated_values)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|dated| {
                let date = NaiveDate::from_ymd_opt(dated.date.year, dated.date.month, dated.date.day)?;
                let value = dated
                    .value
                    .as_deref()
                    .map(|v| v.parse::<i64>().unwrap_or(0))
                    .unwrap_or(0);
                Some(DailyMetricValue {
                    metric: metric.to_string(),
                    date,
                    value,
                })
            })
            .collect();

        Ok(values)
    }
}
