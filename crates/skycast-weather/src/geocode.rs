//! Forward geocoding: city name to ranked coordinate candidates.
//! Uses the Open-Meteo geocoding API - free, no API key required.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use skycast_core::NetworkError;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::fetch::{ApiRequest, FetchError, ResilientFetcher};
use crate::lookup::{normalize_query, CacheKey, Lookup, ResourceKind};
use crate::rate_limit::RateLimiter;
use crate::types::{Candidate, GeocodeResult};

const SEARCH_PATH: &str = "/v1/search";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    // Absent entirely when nothing matched.
    #[serde(default)]
    results: Vec<SearchPlace>,
}

#[derive(Debug, Deserialize)]
struct SearchPlace {
    name: String,
    latitude: f64,
    longitude: f64,
    country: Option<String>,
    admin1: Option<String>,
    timezone: Option<String>,
}

#[derive(Debug)]
pub struct Geocoder {
    lookup: Lookup<GeocodeResult>,
    base_url: String,
    candidate_count: u8,
}

impl Geocoder {
    pub fn new(
        base_url: impl Into<String>,
        candidate_count: u8,
        ttl: Duration,
        capacity: Option<usize>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<ResilientFetcher>,
    ) -> Self {
        Self {
            lookup: Lookup::new(ResourceKind::Geocode, ttl, capacity, limiter, fetcher),
            base_url: base_url.into(),
            candidate_count: candidate_count.max(1),
        }
    }

    pub fn lookup(&self) -> &Lookup<GeocodeResult> {
        &self.lookup
    }

    /// Candidates for `city`, localized to `language`, in provider order.
    ///
    /// An empty candidate list is a successful (and cached) answer.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the upstream call fails or the body is malformed.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn search(
        &self,
        city: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> Result<GeocodeResult, FetchError> {
        let query = normalize_query(city);
        let key = CacheKey::new(ResourceKind::Geocode, &[&query, language]);
        let request = self.request(&query, language)?;

        let result = self
            .lookup
            .get_or_fetch(&key, &request, |body: SearchResponse| Ok(into_result(&query, body)), cancel)
            .await?;

        tracing::debug!(
            "Geocoded '{}' to {} candidate(s)",
            result.city_query,
            result.candidates.len()
        );
        Ok(result)
    }

    fn request(&self, query: &str, language: &str) -> Result<ApiRequest, NetworkError> {
        Ok(ApiRequest::get(&self.base_url, SEARCH_PATH)?
            .query("name", query)
            .query("count", self.candidate_count)
            .query("language", normalize_query(language))
            .query("format", "json"))
    }
}

fn into_result(query: &str, body: SearchResponse) -> GeocodeResult {
    let candidates = body
        .results
        .into_iter()
        .filter(|place| place.latitude.is_finite() && place.longitude.is_finite())
        .map(|place| Candidate {
            name: place.name,
            country: place.country,
            admin1: place.admin1,
            latitude: place.latitude,
            longitude: place.longitude,
            timezone: place.timezone.filter(|tz| !tz.is_empty()),
        })
        .collect();

    GeocodeResult {
        city_query: query.to_string(),
        candidates,
    }
}
