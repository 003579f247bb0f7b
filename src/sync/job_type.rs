//! Sync job types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cache::InvalidationScope;

/// Entity type a sync job reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Locations,
    Reviews,
    Questions,
    Insights,
    Posts,
    Media,
}

impl JobType {
    pub const ALL: [JobType; 6] = [
        JobType::Locations,
        JobType::Reviews,
        JobType::Questions,
        JobType::Insights,
        JobType::Posts,
        JobType::Media,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Locations => "locations",
            JobType::Reviews => "reviews",
            JobType::Questions => "questions",
            JobType::Insights => "insights",
            JobType::Posts => "posts",
            JobType::Media => "media",
        }
    }

    /// Cached views that go stale when this job writes
    pub fn invalidation_scope(&self) -> InvalidationScope {
        match self {
            JobType::Locations => InvalidationScope::Locations,
            JobType::Reviews => InvalidationScope::Reviews,
            JobType::Questions => InvalidationScope::Questions,
            JobType::Insights | JobType::Posts | JobType::Media => InvalidationScope::Home,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|job_type| job_type.as_str() == s)
            .ok_or_else(|| format!("Unknown job type: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_types() {
        assert_eq!("reviews".parse::<JobType>(), Ok(JobType::Reviews));
        assert_eq!("media".parse::<JobType>(), Ok(JobType::Media));
    }

    #[test]
    fn unknown_type_error_names_the_value() {
        let error = "timeline".parse::<JobType>().unwrap_err();
        assert_eq!(error, "Unknown job type: timeline");
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_value(JobType::Questions).unwrap(), "questions");
    }
}
