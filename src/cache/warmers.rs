//! Default bucket warmers
//!
//! Each warmer rebuilds one dashboard read model for a user from the
//! primary database.

use std::sync::Arc;

use super::bucket::CacheBucket;
use super::store::{CacheStore, warmer};
use crate::data::Database;

/// Rows kept in list buckets
const LIST_LIMIT: i64 = 50;

/// Register the database-backed warmer for every bucket
pub fn register_default_warmers(store: &CacheStore, db: Arc<Database>) {
    let overview_db = db.clone();
    store.register_warmer(
        CacheBucket::DashboardOverview,
        warmer(move |user_id: String| {
            let db = overview_db.clone();
            async move {
                let overview = db.get_dashboard_overview(&user_id).await?;
                Ok(Some(serde_json::to_value(overview)?))
            }
        }),
    );

    let locations_db = db.clone();
    store.register_warmer(
        CacheBucket::Locations,
        warmer(move |user_id: String| {
            let db = locations_db.clone();
            async move {
                let locations = db.get_locations_for_user(&user_id).await?;
                Ok(Some(serde_json::to_value(locations)?))
            }
        }),
    );

    let reviews_db = db.clone();
    store.register_warmer(
        CacheBucket::Reviews,
        warmer(move |user_id: String| {
            let db = reviews_db.clone();
            async move {
                let reviews = db.get_reviews_for_user(&user_id, LIST_LIMIT).await?;
                Ok(Some(serde_json::to_value(reviews)?))
            }
        }),
    );

    store.register_warmer(
        CacheBucket::Questions,
        warmer(move |user_id: String| {
            let db = db.clone();
            async move {
                let questions = db.get_questions_for_user(&user_id, LIST_LIMIT).await?;
                Ok(Some(serde_json::to_value(questions)?))
            }
        }),
    );
}
