//! In-memory TTL cache.
//!
//! Each entry carries its own absolute expiry. An entry is visible only while
//! `now < expires_at`; expired entries are removed lazily on read or by
//! [`TtlCache::purge_expired`]. Keys live in a sharded map, so unrelated keys
//! never wait on one another.
//!
//! Without a capacity the cache grows with the number of distinct keys until
//! those keys expire. A capacity bounds that growth: when full, expired
//! entries are purged first and then the entry closest to expiry is evicted.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound used when `now + ttl` overflows the clock.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
pub struct TtlCache<V> {
    name: &'static str,
    entries: DashMap<String, CacheEntry<V>>,
    capacity: Option<usize>,
}

impl<V: Clone> TtlCache<V> {
    /// Unbounded cache.
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, None)
    }

    /// Cache holding at most `capacity` entries (`None` = unbounded).
    pub fn with_capacity(name: &'static str, capacity: Option<usize>) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            capacity: capacity.map(|c| c.max(1)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Physically stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value if present and unexpired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return None,
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }

        // A concurrent set may have refreshed the entry since the read above.
        if self.entries.remove_if(key, |_, e| !e.is_live(now)).is_some() {
            tracing::trace!(cache = self.name, key, "Evicted expired entry on read");
        }
        None
    }

    /// Stores `value` until `now + ttl`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + MAX_TTL);

        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity && !self.entries.contains_key(&key) {
                self.make_room(capacity, now);
            }
        }

        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    /// Removes `key`; absent keys are ignored.
    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn make_room(&self, capacity: usize, now: Instant) {
        self.entries.retain(|_, entry| entry.is_live(now));

        while self.entries.len() >= capacity {
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());

            match victim {
                Some(key) => {
                    tracing::debug!(cache = self.name, key = %key, "Cache full, evicting");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Periodically purges expired entries until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            tracing::debug!(cache = cache.name, removed, "Swept expired entries");
                        }
                    }
                }
            }
            tracing::debug!(cache = cache.name, "Cache sweeper stopped");
        })
    }
}
