//! Current conditions, daily and hourly forecasts from the Open-Meteo
//! forecast API. Times come back in the location's own timezone.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use skycast_core::{CacheConfig, NetworkError, Units};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::fetch::{ApiRequest, FetchError, ResilientFetcher};
use crate::lookup::{CacheKey, Lookup, ResourceKind};
use crate::rate_limit::RateLimiter;
use crate::types::{describe_code, CurrentWeather, DayForecast, HourlyForecast, WeatherCondition};

const FORECAST_PATH: &str = "/v1/forecast";
const DAILY_FIELDS: &str =
    "temperature_2m_max,temperature_2m_min,weathercode,precipitation_probability_max";
const HOURLY_FIELDS: &str =
    "temperature_2m,weathercode,windspeed_10m,relativehumidity_2m,precipitation_probability";

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    current_weather: CurrentBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    temperature: f64,
    windspeed: f64,
    winddirection: f64,
    #[serde(alias = "weather_code")]
    weathercode: i32,
    #[serde(default = "default_is_day")]
    is_day: u8,
    time: String,
}

fn default_is_day() -> u8 {
    1
}

#[derive(Debug, Deserialize)]
struct DailyResponse {
    daily: DailyBlock,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    #[serde(alias = "weather_code")]
    weathercode: Vec<i32>,
    #[serde(default)]
    precipitation_probability_max: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    temperature_2m: Vec<f64>,
    #[serde(alias = "weather_code")]
    weathercode: Vec<i32>,
    #[serde(default)]
    windspeed_10m: Vec<Option<f64>>,
    #[serde(default)]
    relativehumidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability: Vec<Option<f64>>,
}

/// The three forecast-endpoint lookups, each with its own cache and TTL.
#[derive(Debug)]
pub struct ForecastClient {
    current: Lookup<CurrentWeather>,
    daily: Lookup<Vec<DayForecast>>,
    hourly: Lookup<Vec<HourlyForecast>>,
    base_url: String,
}

impl ForecastClient {
    pub fn new(
        base_url: impl Into<String>,
        cache: &CacheConfig,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<ResilientFetcher>,
    ) -> Self {
        let capacity = cache.capacity();
        Self {
            current: Lookup::new(
                ResourceKind::CurrentWeather,
                cache.weather_ttl(),
                capacity,
                Arc::clone(&limiter),
                Arc::clone(&fetcher),
            ),
            daily: Lookup::new(
                ResourceKind::DailyForecast,
                cache.forecast_ttl(),
                capacity,
                Arc::clone(&limiter),
                Arc::clone(&fetcher),
            ),
            hourly: Lookup::new(
                ResourceKind::HourlyForecast,
                cache.forecast_ttl(),
                capacity,
                limiter,
                fetcher,
            ),
            base_url: base_url.into(),
        }
    }

    pub fn current_lookup(&self) -> &Lookup<CurrentWeather> {
        &self.current
    }

    pub fn daily_lookup(&self) -> &Lookup<Vec<DayForecast>> {
        &self.daily
    }

    pub fn hourly_lookup(&self) -> &Lookup<Vec<HourlyForecast>> {
        &self.hourly
    }

    /// # Errors
    ///
    /// Returns [`FetchError`] when the upstream call fails or the body is malformed.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn current(
        &self,
        latitude: f64,
        longitude: f64,
        units: Units,
        cancel: &CancellationToken,
    ) -> Result<CurrentWeather, FetchError> {
        let (lat, lon) = coordinate_parts(latitude, longitude);
        let key = CacheKey::new(ResourceKind::CurrentWeather, &[&lat, &lon, units.as_str()]);
        let request = self
            .request(latitude, longitude, units)?
            .query("current_weather", true);

        self.current
            .get_or_fetch(&key, &request, parse_current, cancel)
            .await
    }

    /// # Errors
    ///
    /// Returns [`FetchError`] when the upstream call fails or the body is malformed.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn daily(
        &self,
        latitude: f64,
        longitude: f64,
        units: Units,
        days: u8,
        cancel: &CancellationToken,
    ) -> Result<Vec<DayForecast>, FetchError> {
        let (lat, lon) = coordinate_parts(latitude, longitude);
        let days_part = days.to_string();
        let key = CacheKey::new(
            ResourceKind::DailyForecast,
            &[&lat, &lon, units.as_str(), &days_part],
        );
        let request = self
            .request(latitude, longitude, units)?
            .query("daily", DAILY_FIELDS)
            .query("forecast_days", days);

        self.daily
            .get_or_fetch(
                &key,
                &request,
                |body: DailyResponse| parse_daily(body, usize::from(days)),
                cancel,
            )
            .await
    }

    /// # Errors
    ///
    /// Returns [`FetchError`] when the upstream call fails or the body is malformed.
    #[instrument(skip(self, cancel), level = "debug")]
    pub async fn hourly(
        &self,
        latitude: f64,
        longitude: f64,
        units: Units,
        hours: u8,
        cancel: &CancellationToken,
    ) -> Result<Vec<HourlyForecast>, FetchError> {
        let (lat, lon) = coordinate_parts(latitude, longitude);
        let hours_part = hours.to_string();
        let key = CacheKey::new(
            ResourceKind::HourlyForecast,
            &[&lat, &lon, units.as_str(), &hours_part],
        );
        let request = self
            .request(latitude, longitude, units)?
            .query("hourly", HOURLY_FIELDS)
            .query("forecast_hours", hours);

        self.hourly
            .get_or_fetch(
                &key,
                &request,
                |body: HourlyResponse| parse_hourly(body, usize::from(hours)),
                cancel,
            )
            .await
    }

    fn request(&self, latitude: f64, longitude: f64, units: Units) -> Result<ApiRequest, NetworkError> {
        Ok(ApiRequest::get(&self.base_url, FORECAST_PATH)?
            .query("latitude", latitude)
            .query("longitude", longitude)
            .query("temperature_unit", units.temperature_unit())
            .query("windspeed_unit", units.windspeed_unit())
            .query("timezone", "auto"))
    }
}

/// Coordinates rounded to ~11 m so nearby candidates share cache entries.
pub(crate) fn coordinate_parts(latitude: f64, longitude: f64) -> (String, String) {
    (format!("{:.4}", latitude), format!("{:.4}", longitude))
}

/// Open-Meteo local timestamps: `2024-05-01T14:00`, seconds optional.
pub(crate) fn parse_local_timestamp(raw: &str) -> Result<NaiveDateTime, FetchError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| FetchError::Decode(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_date(raw: &str) -> Result<NaiveDate, FetchError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| FetchError::Decode(format!("bad date '{}': {}", raw, e)))
}

fn percent(value: Option<f64>) -> Option<u8> {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, 100.0) as u8)
}

fn series_mismatch(block: &str, field: &str, expected: usize, got: usize) -> FetchError {
    FetchError::Decode(format!(
        "{}.{} has {} values, expected {}",
        block, field, got, expected
    ))
}

fn parse_current(body: CurrentResponse) -> Result<CurrentWeather, FetchError> {
    let block = body.current_weather;
    Ok(CurrentWeather {
        temperature: block.temperature,
        wind_speed: block.windspeed,
        wind_direction: block.winddirection,
        weather_code: block.weathercode,
        condition: WeatherCondition::from_code(block.weathercode),
        summary: describe_code(block.weathercode, "en"),
        is_day: block.is_day != 0,
        observed_at: parse_local_timestamp(&block.time)?,
    })
}

fn parse_daily(body: DailyResponse, days: usize) -> Result<Vec<DayForecast>, FetchError> {
    let daily = body.daily;
    let len = daily.time.len();
    for (field, got) in [
        ("temperature_2m_max", daily.temperature_2m_max.len()),
        ("temperature_2m_min", daily.temperature_2m_min.len()),
        ("weathercode", daily.weathercode.len()),
    ] {
        if got != len {
            return Err(series_mismatch("daily", field, len, got));
        }
    }

    daily
        .time
        .iter()
        .enumerate()
        .take(days)
        .map(|(i, date)| {
            let code = daily.weathercode[i];
            Ok(DayForecast {
                date: parse_date(date)?,
                high: daily.temperature_2m_max[i],
                low: daily.temperature_2m_min[i],
                weather_code: code,
                condition: WeatherCondition::from_code(code),
                summary: describe_code(code, "en"),
                precipitation_chance: percent(
                    daily.precipitation_probability_max.get(i).copied().flatten(),
                ),
            })
        })
        .collect()
}

fn parse_hourly(body: HourlyResponse, hours: usize) -> Result<Vec<HourlyForecast>, FetchError> {
    let hourly = body.hourly;
    let len = hourly.time.len();
    for (field, got) in [
        ("temperature_2m", hourly.temperature_2m.len()),
        ("weathercode", hourly.weathercode.len()),
    ] {
        if got != len {
            return Err(series_mismatch("hourly", field, len, got));
        }
    }

    hourly
        .time
        .iter()
        .enumerate()
        .take(hours)
        .map(|(i, time)| {
            let code = hourly.weathercode[i];
            Ok(HourlyForecast {
                time: parse_local_timestamp(time)?,
                temperature: hourly.temperature_2m[i],
                weather_code: code,
                condition: WeatherCondition::from_code(code),
                summary: describe_code(code, "en"),
                wind_speed: hourly.windspeed_10m.get(i).copied().flatten(),
                humidity: percent(hourly.relativehumidity_2m.get(i).copied().flatten()),
                precipitation_chance: percent(
                    hourly.precipitation_probability.get(i).copied().flatten(),
                ),
            })
        })
        .collect()
}
