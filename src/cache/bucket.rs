//! Cache buckets
//!
//! A bucket is a named partition of the cache with its own TTL and warmer.
//! Each bucket corresponds to one dashboard read model, keyed by user id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBucket {
    DashboardOverview,
    Locations,
    Reviews,
    Questions,
}

impl CacheBucket {
    pub const ALL: [CacheBucket; 4] = [
        CacheBucket::DashboardOverview,
        CacheBucket::Locations,
        CacheBucket::Reviews,
        CacheBucket::Questions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBucket::DashboardOverview => "dashboard-overview",
            CacheBucket::Locations => "locations",
            CacheBucket::Reviews => "reviews",
            CacheBucket::Questions => "questions",
        }
    }
}

impl fmt::Display for CacheBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheBucket::ALL
            .into_iter()
            .find(|bucket| bucket.as_str() == s)
            .ok_or_else(|| format!("unknown cache bucket: {s}"))
    }
}

/// Per-bucket time to live
#[derive(Debug, Clone)]
pub struct BucketTtls {
    pub dashboard_overview: Duration,
    pub locations: Duration,
    pub reviews: Duration,
    pub questions: Duration,
}

impl BucketTtls {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            dashboard_overview: Duration::from_secs(config.dashboard_overview_ttl),
            locations: Duration::from_secs(config.locations_ttl),
            reviews: Duration::from_secs(config.reviews_ttl),
            questions: Duration::from_secs(config.questions_ttl),
        }
    }

    pub fn ttl(&self, bucket: CacheBucket) -> Duration {
        match bucket {
            CacheBucket::DashboardOverview => self.dashboard_overview,
            CacheBucket::Locations => self.locations,
            CacheBucket::Reviews => self.reviews,
            CacheBucket::Questions => self.questions,
        }
    }
}

impl Default for BucketTtls {
    fn default() -> Self {
        Self {
            dashboard_overview: Duration::from_secs(300),
            locations: Duration::from_secs(600),
            reviews: Duration::from_secs(300),
            questions: Duration::from_secs(300),
        }
    }
}
