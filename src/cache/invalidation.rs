//! Cache invalidation orchestration
//!
//! Turns "this domain changed for this user" into view revalidations and
//! bucket refreshes. Every path and bucket is handled independently; one
//! failure never stops the others.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::bucket::CacheBucket;
use super::revalidate::PathRevalidator;
use super::store::CacheStore;

/// Domain whose derived views must be refreshed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationScope {
    All,
    Reviews,
    Questions,
    Locations,
    Home,
}

impl InvalidationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationScope::All => "all",
            InvalidationScope::Reviews => "reviews",
            InvalidationScope::Questions => "questions",
            InvalidationScope::Locations => "locations",
            InvalidationScope::Home => "home",
        }
    }

    /// Locale-less view paths rendered from this domain
    pub fn view_paths(&self) -> &'static [&'static str] {
        match self {
            InvalidationScope::All => &["/dashboard", "/locations", "/reviews", "/questions"],
            InvalidationScope::Reviews => &["/reviews", "/dashboard"],
            InvalidationScope::Questions => &["/questions", "/dashboard"],
            InvalidationScope::Locations => &["/locations", "/dashboard"],
            InvalidationScope::Home => &["/dashboard"],
        }
    }

    /// Cache buckets holding read models of this domain
    pub fn buckets(&self) -> &'static [CacheBucket] {
        match self {
            InvalidationScope::All => &CacheBucket::ALL,
            InvalidationScope::Reviews => &[CacheBucket::Reviews, CacheBucket::DashboardOverview],
            InvalidationScope::Questions => {
                &[CacheBucket::Questions, CacheBucket::DashboardOverview]
            }
            InvalidationScope::Locations => {
                &[CacheBucket::Locations, CacheBucket::DashboardOverview]
            }
            InvalidationScope::Home => &[CacheBucket::DashboardOverview],
        }
    }
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvalidationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(InvalidationScope::All),
            "reviews" => Ok(InvalidationScope::Reviews),
            "questions" => Ok(InvalidationScope::Questions),
            "locations" => Ok(InvalidationScope::Locations),
            "home" => Ok(InvalidationScope::Home),
            other => Err(format!("unknown invalidation scope: {other}")),
        }
    }
}

/// Outcome of one invalidation
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    pub scope: String,
    pub user_id: String,
    /// Localized paths a revalidation request was sent for
    pub revalidated_paths: Vec<String>,
    /// Localized paths skipped because revalidation is disabled
    pub skipped_paths: Vec<String>,
    pub failed_paths: Vec<String>,
    pub invalidated_buckets: Vec<String>,
    /// Background re-warms started
    pub warms_scheduled: usize,
}

pub struct InvalidationOrchestrator {
    store: Arc<CacheStore>,
    revalidator: Arc<dyn PathRevalidator>,
    locales: Vec<String>,
}

impl InvalidationOrchestrator {
    pub fn new(
        store: Arc<CacheStore>,
        revalidator: Arc<dyn PathRevalidator>,
        locales: Vec<String>,
    ) -> Self {
        Self {
            store,
            revalidator,
            locales,
        }
    }

    /// Every localized form of the scope's view paths
    pub fn localized_paths(&self, scope: InvalidationScope) -> Vec<String> {
        self.locales
            .iter()
            .flat_map(|locale| {
                scope
                    .view_paths()
                    .iter()
                    .map(move |path| format!("/{}{}", locale, path))
            })
            .collect()
    }

    /// Refresh everything derived from `scope` for `user_id`
    ///
    /// Paths are revalidated for every locale; buckets are invalidated and
    /// then re-warmed in the background.
    pub async fn invalidate_domain(
        &self,
        scope: InvalidationScope,
        user_id: &str,
    ) -> InvalidationReport {
        let mut report = InvalidationReport {
            scope: scope.as_str().to_string(),
            user_id: user_id.to_string(),
            ..Default::default()
        };

        let paths = self.localized_paths(scope);
        let results = futures::future::join_all(paths.iter().map(|path| async move {
            (path, self.revalidator.revalidate(path).await)
        }))
        .await;

        for (path, result) in results {
            match result {
                Ok(true) => report.revalidated_paths.push(path.clone()),
                Ok(false) => report.skipped_paths.push(path.clone()),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Path revalidation failed");
                    report.failed_paths.push(path.clone());
                }
            }
        }

        for bucket in scope.buckets() {
            let bucket = *bucket;
            self.store.invalidate(bucket, user_id).await;
            report.invalidated_buckets.push(bucket.as_str().to_string());

            let store = self.store.clone();
            let id = user_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = store.warm(bucket, &id).await {
                    tracing::warn!(bucket = %bucket, user_id = %id, error = %e, "Cache re-warm failed");
                }
            });
            report.warms_scheduled += 1;
        }

        tracing::info!(
            scope = %scope,
            user_id,
            revalidated = report.revalidated_paths.len(),
            failed = report.failed_paths.len(),
            buckets = report.invalidated_buckets.len(),
            "Invalidated cache domain"
        );

        report
    }
}
