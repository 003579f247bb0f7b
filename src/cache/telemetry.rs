//! Cache telemetry
//!
//! Hit/miss counters and popularity counters for the cache store.
//! One instance is built per process and handed to the store; tests build
//! their own. Counters are best effort and only reset through [`CacheTelemetry::reset`]
//! or by the popularity sweep, which closes the current popularity window.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::bucket::CacheBucket;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HitMiss {
    pub hits: u64,
    pub misses: u64,
}

impl HitMiss {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct TelemetryState {
    total: HitMiss,
    buckets: HashMap<CacheBucket, HitMiss>,
    popularity: HashMap<(CacheBucket, String), u64>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub buckets: BTreeMap<String, HitMiss>,
    /// Number of (bucket, id) pairs with at least one hit since the last sweep
    pub tracked_keys: usize,
}

#[derive(Debug, Default)]
pub struct CacheTelemetry {
    state: Mutex<TelemetryState>,
}

impl CacheTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TelemetryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count a hit and bump the popularity of `(bucket, id)`
    pub fn record_hit(&self, bucket: CacheBucket, id: &str) {
        {
            let mut state = self.lock();
            state.total.hits += 1;
            state.buckets.entry(bucket).or_default().hits += 1;
            *state
                .popularity
                .entry((bucket, id.to_string()))
                .or_insert(0) += 1;
        }
        CACHE_HITS_TOTAL.with_label_values(&[bucket.as_str()]).inc();
    }

    pub fn record_miss(&self, bucket: CacheBucket) {
        {
            let mut state = self.lock();
            state.total.misses += 1;
            state.buckets.entry(bucket).or_default().misses += 1;
        }
        CACHE_MISSES_TOTAL.with_label_values(&[bucket.as_str()]).inc();
    }

    /// Hits recorded for `(bucket, id)` since its counter was last reset
    pub fn popularity(&self, bucket: CacheBucket, id: &str) -> u64 {
        self.lock()
            .popularity
            .get(&(bucket, id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Close the popularity window and return every pair with at least
    /// `threshold` hits in it
    ///
    /// All popularity counters start from zero afterwards.
    pub fn take_popular(&self, threshold: u64) -> Vec<(CacheBucket, String)> {
        let window = std::mem::take(&mut self.lock().popularity);
        window
            .into_iter()
            .filter(|(_, hits)| *hits >= threshold)
            .map(|(key, _)| key)
            .collect()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = self.lock();
        TelemetrySnapshot {
            hits: state.total.hits,
            misses: state.total.misses,
            hit_rate: state.total.hit_rate(),
            buckets: state
                .buckets
                .iter()
                .map(|(bucket, counts)| (bucket.as_str().to_string(), *counts))
                .collect(),
            tracked_keys: state.popularity.len(),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        *self.lock() = TelemetryState::default();
    }
}
