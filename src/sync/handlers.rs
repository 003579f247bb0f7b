//! Job type handlers
//!
//! Each handler pulls one entity type from the provider and upserts it.
//! Location-scoped jobs touch one location, account-scoped jobs every
//! active location of the account. Upserts are keyed by provider resource
//! name, so running a job twice is harmless.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::future::Future;

use super::job_type::JobType;
use super::provider::{
    DAILY_METRICS, Page, ProviderApi, RemoteLocation, RemoteMediaItem, RemotePost, RemoteQuestion,
    RemoteReview,
};
use super::retry::RetryPolicy;
use crate::data::{
    Account, Database, EntityId, Insight, Location, MediaItem, Post, Question, Review, SyncJob,
};
use crate::error::{ApiError, SyncError};

/// Everything a handler needs for one job
pub struct HandlerContext<'a> {
    pub db: &'a Database,
    pub provider: &'a dyn ProviderApi,
    pub retry: &'a RetryPolicy,
    pub account: &'a Account,
    pub job: &'a SyncJob,
    pub insights_days: i64,
}

/// Entities written by a handler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerReport {
    /// Rows upserted
    pub items: u64,
    /// Counts reported in the completion event, e.g. {"reviews": 12}
    pub counts: BTreeMap<String, u64>,
}

impl HandlerReport {
    fn single(entity: &str, count: u64) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert(entity.to_string(), count);
        Self {
            items: count,
            counts,
        }
    }
}

/// Run the handler for `job_type`
pub async fn run_handler(
    job_type: JobType,
    ctx: &HandlerContext<'_>,
) -> Result<HandlerReport, SyncError> {
    match job_type {
        JobType::Locations => sync_locations(ctx).await,
        JobType::Reviews => sync_reviews(ctx).await,
        JobType::Questions => sync_questions(ctx).await,
        JobType::Insights => sync_insights(ctx).await,
        JobType::Posts => sync_posts(ctx).await,
        JobType::Media => sync_media(ctx).await,
    }
}

/// Follow `next_page_token` to the end, retrying each page
///
/// With `since` set, paging stops after the first page holding an item not
/// newer than `since`; such items are dropped.
async fn fetch_pages<T, F, Fut>(
    retry: &RetryPolicy,
    operation: &str,
    since: Option<DateTime<Utc>>,
    updated_at: impl Fn(&T) -> DateTime<Utc>,
    mut fetch: F,
) -> Result<Vec<T>, ApiError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let mut items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let token = page_token.take();
        let page = retry.run(operation, || fetch(token.clone())).await?;

        let mut reached_known = false;
        for item in page.items {
            match since {
                Some(since) if updated_at(&item) <= since => reached_known = true,
                _ => items.push(item),
            }
        }

        match page.next_page_token {
            Some(next) if !reached_known && !next.is_empty() => page_token = Some(next),
            _ => break,
        }
    }

    Ok(items)
}

/// Locations the job applies to
async fn target_locations(ctx: &HandlerContext<'_>) -> Result<Vec<Location>, SyncError> {
    match &ctx.job.location_id {
        Some(location_id) => {
            let location = ctx
                .db
                .get_location(location_id)
                .await?
                .filter(|location| location.account_id == ctx.account.id)
                .ok_or_else(|| SyncError::Missing(format!("Location {location_id} not found")))?;
            Ok(vec![location])
        }
        None => Ok(ctx.db.get_locations_for_account(&ctx.account.id).await?),
    }
}

fn incremental(ctx: &HandlerContext<'_>) -> bool {
    ctx.job.is_incremental()
}

async fn sync_locations(ctx: &HandlerContext<'_>) -> Result<HandlerReport, SyncError> {
    let remote = fetch_pages(
        ctx.retry,
        "list_locations",
        None,
        |_: &RemoteLocation| Utc::now(),
        |token| ctx.provider.list_locations(ctx.account, token),
    )
    .await?;

    let scoped_to = match &ctx.job.location_id {
        Some(location_id) => ctx.db.get_location(location_id).await?.map(|l| l.resource_name),
        None => None,
    };

    let now = Utc::now();
    let mut written = 0;
    for item in remote {
        if scoped_to
            .as_deref()
            .is_some_and(|resource_name| resource_name != item.resource_name)
        {
            continue;
        }

        ctx.db
            .upsert_location(&Location {
                id: EntityId::new().0,
                account_id: ctx.account.id.clone(),
                user_id: ctx.account.user_id.clone(),
                resource_name: item.resource_name,
                title: item.title,
                address: item.address,
                phone: item.phone,
                website: item.website,
                verification_state: item.verification_state,
                is_active: true,
                created_at: now,
                updated_at: now,
                synced_at: Some(now),
            })
            .await?;
        written += 1;
    }

    tracing::debug!(account_id = %ctx.account.id, written, "Synced locations");
    Ok(HandlerReport::single("locations", written))
}

async fn sync_reviews(ctx: &HandlerContext<'_>) -> Result<HandlerReport, SyncError> {
    let mut written = 0;
    for location in target_locations(ctx).await? {
        let since = if incremental(ctx) {
            ctx.db.latest_review_update(&location.id).await?
        } else {
            None
        };

        let reviews = fetch_pages(
            ctx.retry,
            "list_reviews",
            since,
            |review: &RemoteReview| review.update_time,
            |token| ctx.provider.list_reviews(ctx.account, &location, token),
        )
        .await?;

        let now = Utc::now();
        for review in reviews {
            ctx.db
                .upsert_review(&Review {
                    id: EntityId::new().0,
                    location_id: location.id.clone(),
                    resource_name: review.resource_name,
                    reviewer_name: review.reviewer_name,
                    star_rating: review.star_rating,
                    comment: review.comment,
                    reply_comment: review.reply_comment,
                    reply_updated_at: review.reply_updated_at,
                    create_time: review.create_time,
                    update_time: review.update_time,
                    synced_at: now,
                })
                .await?;
            written += 1;
        }
    }

    Ok(HandlerReport::single("reviews", written))
}

async fn sync_questions(ctx: &HandlerContext<'_>) -> Result<HandlerReport, SyncError> {
    let mut written = 0;
    let mut answered = 0;
    for location in target_locations(ctx).await? {
        let since = if incremental(ctx) {
            ctx.db.latest_question_update(&location.id).await?
        } else {
            None
        };

        let questions = fetch_pages(
            ctx.retry,
            "list_questions",
            since,
            |question: &RemoteQuestion| question.update_time,
            |token| ctx.provider.list_questions(ctx.account, &location, token),
        )
        .await?;

        let now = Utc::now();
        for question in questions {
            if question.answer_count > 0 {
                answered += 1;
            }
            ctx.db
                .upsert_question(&Question {
                    id: EntityId::new().0,
                    location_id: location.id.clone(),
                    resource_name: question.resource_name,
                    author_name: question.author_name,
                    text: question.text,
                    upvote_count: question.upvote_count,
                    answer_count: question.answer_count,
                    top_answer: question.top_answer,
                    create_time: question.create_time,
                    update_time: question.update_time,
                    synced_at: now,
                })
                .await?;
            written += 1;
        }
    }

    let mut report = HandlerReport::single("questions", written);
    report.counts.insert("answered".to_string(), answered);
    Ok(report)
}

async fn sync_insights(ctx: &HandlerContext<'_>) -> Result<HandlerReport, SyncError> {
    let days = ctx.insights_days.max(1);
    let end = Utc::now().date_naive() - ChronoDuration::days(1);
    let start = end - ChronoDuration::days(days - 1);

    let mut written = 0;
    for location in target_locations(ctx).await? {
        for metric in DAILY_METRICS {
            let values = ctx
                .retry
                .run("fetch_daily_metric", || {
                    ctx.provider
                        .fetch_daily_metric(ctx.account, &location, metric, start, end)
                })
                .await?;

            let now = Utc::now();
            for value in values {
                ctx.db
                    .upsert_insight(&Insight {
                        location_id: location.id.clone(),
                        metric: value.metric,
                        date: value.date.format("%Y-%m-%d").to_string(),
                        value: value.value,
                        synced_at: now,
                    })
                    .await?;
                written += 1;
            }
        }
    }

    Ok(HandlerReport::single("insights", written))
}

async fn sync_posts(ctx: &HandlerContext<'_>) -> Result<HandlerReport, SyncError> {
    let mut written = 0;
    for location in target_locations(ctx).await? {
        let since = if incremental(ctx) {
            ctx.db.latest_post_update(&location.id).await?
        } else {
            None
        };

        let posts = fetch_pages(
            ctx.retry,
            "list_posts",
            since,
            |post: &RemotePost| post.update_time,
            |token| ctx.provider.list_posts(ctx.account, &location, token),
        )
        .await?;

        let now = Utc::now();
        for post in posts {
            ctx.db
                .upsert_post(&Post {
                    id: EntityId::new().0,
                    location_id: location.id.clone(),
                    resource_name: post.resource_name,
                    topic_type: post.topic_type,
                    summary: post.summary,
                    state: post.state,
                    search_url: post.search_url,
                    create_time: post.create_time,
                    update_time: post.update_time,
                    synced_at: now,
                })
                .await?;
            written += 1;
        }
    }

    Ok(HandlerReport::single("posts", written))
}

async fn sync_media(ctx: &HandlerContext<'_>) -> Result<HandlerReport, SyncError> {
    let mut written = 0;
    for location in target_locations(ctx).await? {
        // Media items are immutable once created, so every page is read
        let items = fetch_pages(
            ctx.retry,
            "list_media",
            None,
            |item: &RemoteMediaItem| item.create_time,
            |token| ctx.provider.list_media(ctx.account, &location, token),
        )
        .await?;

        let now = Utc::now();
        for item in items {
            ctx.db
                .upsert_media_item(&MediaItem {
                    id: EntityId::new().0,
                    location_id: location.id.clone(),
                    resource_name: item.resource_name,
                    media_format: item.media_format,
                    category: item.category,
                    google_url: item.google_url,
                    thumbnail_url: item.thumbnail_url,
                    create_time: item.create_time,
                    synced_at: now,
                })
                .await?;
            written += 1;
        }
    }

    Ok(HandlerReport::single("media", written))
}
