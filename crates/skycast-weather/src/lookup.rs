//! Cache → limiter → fetch → cache composition, one instance per resource.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::TtlCache;
use crate::fetch::{ApiRequest, FetchError, ResilientFetcher};
use crate::rate_limit::RateLimiter;

/// Upstream resource families, each with its own cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Geocode,
    CurrentWeather,
    DailyForecast,
    HourlyForecast,
    Timezone,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Geocode => "geocode",
            ResourceKind::CurrentWeather => "weather",
            ResourceKind::DailyForecast => "forecast",
            ResourceKind::HourlyForecast => "hourly",
            ResourceKind::Timezone => "timezone",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trims, collapses inner whitespace and lowercases.
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `<resource>:<part>:<part>...` with every part normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(kind: ResourceKind, parts: &[&str]) -> Self {
        let mut key = String::from(kind.as_str());
        for part in parts {
            key.push(':');
            key.push_str(&normalize_query(part));
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
pub struct LookupStats {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub resource: ResourceKind,
    pub hits: u64,
    pub misses: u64,
    /// Misses that produced a fresh cached value
    pub fetches: u64,
    pub failures: u64,
    pub entries: usize,
}

pub struct Lookup<V> {
    kind: ResourceKind,
    ttl: Duration,
    cache: Arc<TtlCache<V>>,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<ResilientFetcher>,
    stats: LookupStats,
}

impl<V> fmt::Debug for Lookup<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lookup")
            .field("kind", &self.kind)
            .field("ttl", &self.ttl)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<V> Lookup<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        kind: ResourceKind,
        ttl: Duration,
        capacity: Option<usize>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<ResilientFetcher>,
    ) -> Self {
        Self {
            kind,
            ttl,
            cache: Arc::new(TtlCache::with_capacity(kind.as_str(), capacity)),
            limiter,
            fetcher,
            stats: LookupStats::default(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &Arc<TtlCache<V>> {
        &self.cache
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            resource: self.kind,
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            fetches: self.stats.fetches.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            entries: self.cache.len(),
        }
    }

    /// Returns the cached value for `key`, or fetches, parses and caches it.
    ///
    /// A hit touches neither the limiter nor the network. Failures are not
    /// cached, so the next call starts over from the cache check.
    ///
    /// # Errors
    ///
    /// Propagates [`FetchError`] from the fetcher or from `parse`; a
    /// cancelled limiter wait becomes [`FetchError::Cancelled`].
    pub async fn get_or_fetch<T, P>(
        &self,
        key: &CacheKey,
        request: &ApiRequest,
        parse: P,
        cancel: &CancellationToken,
    ) -> Result<V, FetchError>
    where
        T: DeserializeOwned,
        P: FnOnce(T) -> Result<V, FetchError>,
    {
        if let Some(value) = self.cache.get(key.as_str()) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(resource = %self.kind, key = %key, "Cache hit");
            return Ok(value);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let result = self.fetch_and_parse(request, parse, cancel).await;
        match result {
            Ok(value) => {
                self.stats.fetches.fetch_add(1, Ordering::Relaxed);
                self.cache.set(key.as_str(), value.clone(), self.ttl);
                Ok(value)
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn fetch_and_parse<T, P>(
        &self,
        request: &ApiRequest,
        parse: P,
        cancel: &CancellationToken,
    ) -> Result<V, FetchError>
    where
        T: DeserializeOwned,
        P: FnOnce(T) -> Result<V, FetchError>,
    {
        self.limiter
            .acquire(cancel)
            .await
            .map_err(|_| FetchError::Cancelled)?;

        tracing::info!(resource = %self.kind, url = %request.url(), "Fetching from upstream");
        let body: T = self.fetcher.fetch_json(request, cancel).await?;
        parse(body)
    }
}
