//! City-level weather operations over the shared limiter and fetcher.

use std::sync::Arc;

use chrono::Utc;
use skycast_core::{Config, NetworkError, Units};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::fetch::{HttpTransport, ResilientFetcher, Transport};
use crate::forecast::ForecastClient;
use crate::geocode::Geocoder;
use crate::lookup::StatsSnapshot;
use crate::outcome::LookupOutcome;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::suggest::{CityMatch, CityMatcher};
use crate::timezone::{self, ResolvedZone, TimezoneResolver};
use crate::types::{Candidate, CurrentReport, DailyReport, HourlyReport, LocalTimeReport};

pub struct WeatherService {
    config: Config,
    limiter: Arc<RateLimiter>,
    geocoder: Geocoder,
    forecasts: ForecastClient,
    timezones: TimezoneResolver,
    matcher: CityMatcher,
}

impl std::fmt::Debug for WeatherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherService")
            .field("limiter", &self.limiter)
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

impl WeatherService {
    /// Service backed by a real HTTP client built from `config.http`.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn from_config(config: Config) -> Result<Self, NetworkError> {
        let transport = HttpTransport::from_config(&config.http)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Service over an injected transport. All lookups share it, one
    /// limiter and one fetcher.
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.requests_per_second));
        let fetcher = Arc::new(ResilientFetcher::new(
            transport,
            RetryPolicy::from_config(&config.http),
            config.http.timeout(),
        ));
        let capacity = config.cache.capacity();

        let geocoder = Geocoder::new(
            config.http.geocoding_url.clone(),
            config.suggestions.candidate_count,
            config.cache.geocode_ttl(),
            capacity,
            Arc::clone(&limiter),
            Arc::clone(&fetcher),
        );
        let forecasts = ForecastClient::new(
            config.http.forecast_url.clone(),
            &config.cache,
            Arc::clone(&limiter),
            Arc::clone(&fetcher),
        );
        let timezones = TimezoneResolver::new(
            config.http.forecast_url.clone(),
            config.cache.timezone_ttl(),
            capacity,
            Arc::clone(&limiter),
            fetcher,
        );

        tracing::info!(
            "Weather service ready (rate limit {}/s, {} attempt(s) per request)",
            config.rate_limit.requests_per_second,
            config.http.retry_total.max(1)
        );

        Self {
            matcher: CityMatcher::from_config(&config.suggestions),
            config,
            limiter,
            geocoder,
            forecasts,
            timezones,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Starts one expiry sweeper per cache namespace. Returns no handles
    /// when sweeping is disabled.
    pub fn start_sweepers(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let Some(interval) = self.config.cache.sweep_interval() else {
            return Vec::new();
        };
        vec![
            self.geocoder.lookup().cache().spawn_sweeper(interval, cancel.clone()),
            self.forecasts.current_lookup().cache().spawn_sweeper(interval, cancel.clone()),
            self.forecasts.daily_lookup().cache().spawn_sweeper(interval, cancel.clone()),
            self.forecasts.hourly_lookup().cache().spawn_sweeper(interval, cancel.clone()),
            self.timezones.lookup().cache().spawn_sweeper(interval, cancel.clone()),
        ]
    }

    pub fn stats(&self) -> Vec<StatsSnapshot> {
        vec![
            self.geocoder.lookup().stats(),
            self.forecasts.current_lookup().stats(),
            self.forecasts.daily_lookup().stats(),
            self.forecasts.hourly_lookup().stats(),
            self.timezones.lookup().stats(),
        ]
    }

    pub fn clear_caches(&self) {
        self.geocoder.lookup().clear();
        self.forecasts.current_lookup().clear();
        self.forecasts.daily_lookup().clear();
        self.forecasts.hourly_lookup().clear();
        self.timezones.lookup().clear();
        tracing::info!("All weather caches cleared");
    }

    /// Geocodes `city` and picks the first candidate that matches it.
    #[instrument(skip(self, cancel))]
    pub async fn resolve_city(
        &self,
        city: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> LookupOutcome<Candidate> {
        let result = match self.geocoder.search(city, language, cancel).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Geocoding '{}' failed: {}", city, e);
                return LookupOutcome::Failed(e.into());
            }
        };

        match self.matcher.resolve(city, &result.candidates) {
            CityMatch::Found(candidate) => LookupOutcome::Found(candidate),
            CityMatch::NotFound { suggestions } => {
                tracing::info!(
                    "No match for '{}' ({} suggestion(s))",
                    city.trim(),
                    suggestions.len()
                );
                LookupOutcome::NotFound {
                    query: city.trim().to_string(),
                    suggestions,
                }
            }
        }
    }

    #[instrument(skip(self, cancel))]
    pub async fn current_weather(
        &self,
        city: &str,
        units: Units,
        language: &str,
        cancel: &CancellationToken,
    ) -> LookupOutcome<CurrentReport> {
        let location = match self.resolve_city(city, language, cancel).await.into_found() {
            Ok(location) => location,
            Err(outcome) => return outcome,
        };

        LookupOutcome::from(
            self.forecasts
                .current(location.latitude, location.longitude, units, cancel)
                .await,
        )
        .map(|current| {
            CurrentReport {
                location,
                units,
                current,
            }
            .localize(language)
        })
    }

    #[instrument(skip(self, cancel))]
    pub async fn daily_forecast(
        &self,
        city: &str,
        days: u8,
        units: Units,
        language: &str,
        cancel: &CancellationToken,
    ) -> LookupOutcome<DailyReport> {
        let location = match self.resolve_city(city, language, cancel).await.into_found() {
            Ok(location) => location,
            Err(outcome) => return outcome,
        };

        LookupOutcome::from(
            self.forecasts
                .daily(location.latitude, location.longitude, units, days, cancel)
                .await,
        )
        .map(|days| {
            DailyReport {
                location,
                units,
                days,
            }
            .localize(language)
        })
    }

    #[instrument(skip(self, cancel))]
    pub async fn hourly_forecast(
        &self,
        city: &str,
        hours: u8,
        units: Units,
        language: &str,
        cancel: &CancellationToken,
    ) -> LookupOutcome<HourlyReport> {
        let location = match self.resolve_city(city, language, cancel).await.into_found() {
            Ok(location) => location,
            Err(outcome) => return outcome,
        };

        LookupOutcome::from(
            self.forecasts
                .hourly(location.latitude, location.longitude, units, hours, cancel)
                .await,
        )
        .map(|hours| {
            HourlyReport {
                location,
                units,
                hours,
            }
            .localize(language)
        })
    }

    /// Local time in `city`. Uses the geocoder's zone when it has one,
    /// otherwise asks the forecast API, otherwise estimates from longitude.
    #[instrument(skip(self, cancel))]
    pub async fn local_time(
        &self,
        city: &str,
        language: &str,
        cancel: &CancellationToken,
    ) -> LookupOutcome<LocalTimeReport> {
        let location = match self.resolve_city(city, language, cancel).await.into_found() {
            Ok(location) => location,
            Err(outcome) => return outcome,
        };

        let known = location.timezone.as_deref().and_then(timezone::parse_zone);
        let zone = match known {
            Some(tz) => Ok(ResolvedZone::known(tz)),
            None => {
                self.timezones
                    .resolve(location.latitude, location.longitude, cancel)
                    .await
            }
        };

        LookupOutcome::from(zone).map(|zone| LocalTimeReport {
            time: timezone::local_time(zone, Utc::now()),
            location,
        })
    }
}
