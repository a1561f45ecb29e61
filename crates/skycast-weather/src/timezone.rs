//! Timezone resolution and local clock readings.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Offset, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use skycast_core::NetworkError;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::fetch::{ApiRequest, FetchError, ResilientFetcher};
use crate::forecast::coordinate_parts;
use crate::lookup::{CacheKey, Lookup, ResourceKind};
use crate::rate_limit::RateLimiter;
use crate::types::LocalTime;

const FORECAST_PATH: &str = "/v1/forecast";

#[derive(Debug, Deserialize)]
struct TimezoneResponse {
    timezone: String,
}

/// A zone plus whether it came from the longitude estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedZone {
    pub tz: Tz,
    pub estimated: bool,
}

impl ResolvedZone {
    pub fn known(tz: Tz) -> Self {
        Self { tz, estimated: false }
    }

    /// Fixed-offset zone derived from longitude.
    pub fn estimate(longitude: f64) -> Self {
        let tz = estimated_zone_name(longitude)
            .parse::<Tz>()
            .unwrap_or(Tz::UTC);
        Self { tz, estimated: true }
    }
}

/// `Etc/GMT±N` for the nominal 15° band containing `longitude`.
///
/// POSIX-style names invert the sign: UTC+8 is `Etc/GMT-8`.
pub fn estimated_zone_name(longitude: f64) -> String {
    let hours = if longitude.is_finite() {
        (longitude / 15.0).round().clamp(-12.0, 12.0) as i32
    } else {
        0
    };
    match hours {
        0 => "Etc/GMT".to_string(),
        h if h > 0 => format!("Etc/GMT-{}", h),
        h => format!("Etc/GMT+{}", -h),
    }
}

/// Parses an IANA name, rejecting anything chrono-tz does not know.
pub fn parse_zone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

/// Clock reading for `zone` at `now`.
pub fn local_time(zone: ResolvedZone, now: DateTime<Utc>) -> LocalTime {
    let local = now.with_timezone(&zone.tz);
    let offset_secs = local.offset().fix().local_minus_utc();

    LocalTime {
        timezone: zone.tz.name().to_string(),
        local_time: local.to_rfc3339(),
        utc_offset: format_utc_offset(offset_secs),
        weekday: local.format("%A").to_string(),
        estimated: zone.estimated,
    }
}

/// `UTC+8`, `UTC-3:30`, `UTC+0`.
pub fn format_utc_offset(offset_secs: i32) -> String {
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let total_minutes = offset_secs.unsigned_abs() / 60;
    let (hours, minutes) = (total_minutes / 60, total_minutes % 60);
    if minutes == 0 {
        format!("UTC{}{}", sign, hours)
    } else {
        format!("UTC{}{}:{:02}", sign, hours, minutes)
    }
}

/// Looks up the IANA zone for coordinates via `timezone=auto`.
#[derive(Debug)]
pub struct TimezoneResolver {
    lookup: Lookup<String>,
    base_url: String,
}

impl TimezoneResolver {
    pub fn new(
        base_url: impl Into<String>,
        ttl: Duration,
        capacity: Option<usize>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<ResilientFetcher>,
    ) -> Self {
        Self {
            lookup: Lookup::new(ResourceKind::Timezone, ttl, capacity, limiter, fetcher),
            base_url: base_url.into(),
        }
    }

    pub fn lookup(&self) -> &Lookup<String> {
        &self.lookup
    }

    /// # Errors
    ///
    /// Returns [`FetchError`] when the upstream call fails, or
    /// [`FetchError::Decode`] for a zone name chrono-tz does not recognise.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn lookup_zone(
        &self,
        latitude: f64,
        longitude: f64,
        cancel: &CancellationToken,
    ) -> Result<Tz, FetchError> {
        let (lat, lon) = coordinate_parts(latitude, longitude);
        let key = CacheKey::new(ResourceKind::Timezone, &[&lat, &lon]);
        let request = self.request(latitude, longitude)?;

        let name = self
            .lookup
            .get_or_fetch(&key, &request, parse_timezone, cancel)
            .await?;
        parse_zone(&name).ok_or_else(|| FetchError::Decode(format!("unknown timezone '{}'", name)))
    }

    /// Resolved zone for coordinates, estimating from longitude when the
    /// lookup fails for any reason other than cancellation.
    ///
    /// # Errors
    ///
    /// Only [`FetchError::Cancelled`].
    pub async fn resolve(
        &self,
        latitude: f64,
        longitude: f64,
        cancel: &CancellationToken,
    ) -> Result<ResolvedZone, FetchError> {
        match self.lookup_zone(latitude, longitude, cancel).await {
            Ok(tz) => Ok(ResolvedZone::known(tz)),
            Err(FetchError::Cancelled) => Err(FetchError::Cancelled),
            Err(e) => {
                let fallback = ResolvedZone::estimate(longitude);
                tracing::warn!(
                    "Timezone lookup failed ({}), falling back to estimated timezone {}",
                    e,
                    fallback.tz.name()
                );
                Ok(fallback)
            }
        }
    }

    fn request(&self, latitude: f64, longitude: f64) -> Result<ApiRequest, NetworkError> {
        Ok(ApiRequest::get(&self.base_url, FORECAST_PATH)?
            .query("latitude", latitude)
            .query("longitude", longitude)
            .query("timezone", "auto")
            .query("forecast_days", 1))
    }
}

fn parse_timezone(body: TimezoneResponse) -> Result<String, FetchError> {
    match parse_zone(&body.timezone) {
        Some(tz) => Ok(tz.name().to_string()),
        None => Err(FetchError::Decode(format!(
            "unknown timezone '{}'",
            body.timezone
        ))),
    }
}
