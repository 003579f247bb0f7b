//! In-process fallback tier
//!
//! Bounded LRU cache used when the shared tier is absent or unreachable.
//! Built on Moka with its LRU eviction policy. Expiry is stored with each
//! value and checked when the entry is read; an expired entry stays in the
//! cache until it is overwritten or becomes the eviction victim.

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded LRU cache of serialized values
pub struct FallbackCache {
    entries: Cache<String, Slot>,
    /// Keys evicted for size since the last drain
    evicted: Arc<Mutex<Vec<String>>>,
    capacity: usize,
}

impl FallbackCache {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();

        let entries = Cache::builder()
            .max_capacity(capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key: Arc<String>, _slot: Slot, cause| {
                if cause == RemovalCause::Size {
                    if let Ok(mut evicted) = sink.lock() {
                        evicted.push(key.as_ref().clone());
                    }
                }
            })
            .build();

        Self {
            entries,
            evicted,
            capacity,
        }
    }

    /// Read an entry and mark it most recently used
    ///
    /// Returns `None` for absent and expired entries alike.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.value)
    }

    /// Insert or replace an entry
    ///
    /// Inserting a new key into a full cache evicts exactly the least
    /// recently used entry.
    ///
    /// # Returns
    /// The key that was evicted, if any
    pub fn set(&self, key: &str, value: String, ttl: Duration) -> Option<String> {
        let slot = Slot {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), slot);
        // Apply recorded reads, then the insert and its eviction, in order
        self.entries.run_pending_tasks();

        match self.evicted.lock() {
            Ok(mut evicted) => evicted.pop(),
            Err(_) => None,
        }
    }

    /// Remove an entry, returning whether it was present
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Entries physically held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }
}
