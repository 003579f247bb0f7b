//! Rate limiting for inbound notifications
//!
//! Fixed window counter per client address.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::AppError;

const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// Rate limiter entry
#[derive(Debug, Clone)]
struct RateLimitEntry {
    /// Number of requests in current window
    count: u32,
    /// Window start time
    window_start: Instant,
}

impl RateLimitEntry {
    /// Check if this entry is in a new window
    fn is_new_window(&self, window_duration: Duration) -> bool {
        self.window_start.elapsed() >= window_duration
    }

    /// Seconds until the current window closes, at least one
    fn seconds_left(&self, window_duration: Duration) -> u64 {
        let left = window_duration.saturating_sub(self.window_start.elapsed());
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        secs.max(1)
    }

    /// Increment count or reset if new window
    fn increment(&mut self, window_duration: Duration) {
        if self.is_new_window(window_duration) {
            self.count = 1;
            self.window_start = Instant::now();
        } else {
            self.count += 1;
        }
    }
}

/// Per-client limiter for the notification endpoints
pub struct RateLimiter {
    /// Rate limit entries: client key -> entry
    entries: Arc<RwLock<HashMap<String, RateLimitEntry>>>,
    /// Maximum requests per window
    max_requests: u32,
    /// Window duration
    window_duration: Duration,
    /// Maximum number of tracked keys in memory
    max_tracked_keys: usize,
}

impl RateLimiter {
    /// Create new rate limiter
    ///
    /// # Arguments
    /// * `max_requests` - Maximum requests per window
    /// * `window_duration` - Window duration
    pub fn new(max_requests: u32, window_duration: Duration) -> Self {
        Self::with_max_tracked_keys(max_requests, window_duration, DEFAULT_MAX_TRACKED_KEYS)
    }

    /// Create new rate limiter with explicit in-memory key cap.
    pub fn with_max_tracked_keys(
        max_requests: u32,
        window_duration: Duration,
        max_tracked_keys: usize,
    ) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_requests: max_requests.max(1),
            window_duration,
            max_tracked_keys: max_tracked_keys.max(1),
        }
    }

    fn prune_expired_locked(
        entries: &mut HashMap<String, RateLimitEntry>,
        window_duration: Duration,
    ) -> usize {
        let before = entries.len();
        entries.retain(|_, value| !value.is_new_window(window_duration));
        before - entries.len()
    }

    fn evict_oldest_locked(entries: &mut HashMap<String, RateLimitEntry>) -> bool {
        let Some(oldest_key) = entries
            .iter()
            .min_by_key(|(_, value)| value.window_start)
            .map(|(key, _)| key.clone())
        else {
            return false;
        };
        entries.remove(&oldest_key);
        true
    }

    /// Count a request from `key`
    ///
    /// # Returns
    /// `Err(AppError::RateLimited)` with the seconds left in the window
    /// once `key` used up its budget
    pub async fn check_and_increment(&self, key: &str) -> Result<(), AppError> {
        let mut entries = self.entries.write().await;

        if !entries.contains_key(key) && entries.len() >= self.max_tracked_keys {
            Self::prune_expired_locked(&mut entries, self.window_duration);
            if entries.len() >= self.max_tracked_keys {
                let _ = Self::evict_oldest_locked(&mut entries);
            }
        }

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                window_start: Instant::now(),
            });

        if !entry.is_new_window(self.window_duration) && entry.count >= self.max_requests {
            Err(AppError::RateLimited {
                retry_after_secs: entry.seconds_left(self.window_duration),
            })
        } else {
            entry.increment(self.window_duration);
            Ok(())
        }
    }

    /// Requests counted for `key` in its current window
    pub async fn get_count(&self, key: &str) -> u32 {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| !e.is_new_window(self.window_duration))
            .map(|e| e.count)
            .unwrap_or(0)
    }

    /// Prune old entries
    ///
    /// Called periodically from the maintenance loop.
    pub async fn prune_old(&self) {
        let mut entries = self.entries.write().await;
        let removed = Self::prune_expired_locked(&mut entries, self.window_duration);

        if removed > 0 {
            tracing::debug!("Pruned {} old rate limit entries", removed);
        }
    }

    pub async fn stats(&self) -> RateLimitStats {
        let entries = self.entries.read().await;
        let active = entries
            .values()
            .filter(|e| !e.is_new_window(self.window_duration))
            .count();

        RateLimitStats {
            total_entries: entries.len(),
            active_entries: active,
            max_requests: self.max_requests,
            window_seconds: self.window_duration.as_secs(),
            max_tracked_keys: self.max_tracked_keys,
        }
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub total_entries: usize,
    /// Entries whose window is still open
    pub active_entries: usize,
    pub max_requests: u32,
    pub window_seconds: u64,
    pub max_tracked_keys: usize,
}
