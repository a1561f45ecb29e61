use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "SKYCAST_CONFIG";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Measurement system requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }

    pub fn temperature_unit(&self) -> &'static str {
        match self {
            Units::Metric => "celsius",
            Units::Imperial => "fahrenheit",
        }
    }

    pub fn windspeed_unit(&self) -> &'static str {
        match self {
            Units::Metric => "kmh",
            Units::Imperial => "mph",
        }
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            other => Err(format!(
                "unsupported units '{}', expected 'metric' or 'imperial'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upstream HTTP settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Cache lifetimes and bounds
    #[serde(default)]
    pub cache: CacheConfig,

    /// Outbound request ceiling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Defaults applied when a tool call omits an argument
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// City suggestion tuning
    #[serde(default)]
    pub suggestions: SuggestionConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-attempt request timeout in seconds
    pub timeout_secs: f64,

    /// Total attempts for one logical request (1 = no retries)
    pub retry_total: u32,

    /// Base of the exponential backoff, in seconds
    pub retry_backoff_secs: f64,

    /// Upper bound for a single backoff delay, in seconds
    pub max_backoff_secs: f64,

    pub user_agent: String,

    /// Base URL of the geocoding API
    pub geocoding_url: String,

    /// Base URL of the forecast API
    pub forecast_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10.0,
            retry_total: 3,
            retry_backoff_secs: 0.3,
            max_backoff_secs: 5.0,
            user_agent: format!("skycast/{}", env!("CARGO_PKG_VERSION")),
            geocoding_url: "https://geocoding-api.open-meteo.com".to_string(),
            forecast_url: "https://api.open-meteo.com".to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        secs_to_duration(self.retry_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        secs_to_duration(self.max_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub geocode_ttl_secs: u64,
    pub weather_ttl_secs: u64,
    pub forecast_ttl_secs: u64,
    pub timezone_ttl_secs: u64,

    /// Entry ceiling per cache namespace; 0 disables the bound
    pub max_entries: usize,

    /// Interval of the background expiry sweep; 0 disables it
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            geocode_ttl_secs: 3600,
            weather_ttl_secs: 300,
            forecast_ttl_secs: 900,
            timezone_ttl_secs: 3600,
            max_entries: 1000,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn geocode_ttl(&self) -> Duration {
        Duration::from_secs(self.geocode_ttl_secs)
    }

    pub fn weather_ttl(&self) -> Duration {
        Duration::from_secs(self.weather_ttl_secs)
    }

    pub fn forecast_ttl(&self) -> Duration {
        Duration::from_secs(self.forecast_ttl_secs)
    }

    pub fn timezone_ttl(&self) -> Duration {
        Duration::from_secs(self.timezone_ttl_secs)
    }

    /// `None` means unbounded.
    pub fn capacity(&self) -> Option<usize> {
        (self.max_entries > 0).then_some(self.max_entries)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum upstream requests in any trailing second; 0 = unlimited
    pub requests_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub units: Units,
    pub language: String,
    pub forecast_days: u8,
    pub forecast_hours: u8,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            units: Units::Metric,
            language: "en".to_string(),
            forecast_days: 3,
            forecast_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    /// Candidates requested from the geocoder per lookup
    pub candidate_count: u8,

    /// Most suggestions surfaced on a not-found outcome
    pub max_suggestions: usize,

    /// Normalized similarity (0.0..=1.0) at which a candidate counts as a match
    pub min_similarity: f64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            candidate_count: 5,
            max_suggestions: 5,
            min_similarity: 0.75,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            http: HttpConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            defaults: DefaultsConfig::default(),
            suggestions: SuggestionConfig::default(),
        }
    }
}

/// Out-of-range values become zero; `validate()` rejects them first.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Finite, non-negative and small enough for a `Duration`.
fn fits_duration(secs: f64) -> bool {
    Duration::try_from_secs_f64(secs).is_ok()
}

fn parse_override<T: FromStr>(key: &str, raw: &str) -> std::result::Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidOverride {
        key: key.to_string(),
        message: e.to_string(),
    })
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load and parse a specific TOML file (no environment overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::Malformed(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Validate, failing on errors and logging warnings.
    ///
    /// Call after logging is initialized so the warnings are not lost.
    pub fn ensure_valid(&self) -> Result<ValidationResult> {
        let validation = self.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(validation)
    }

    /// Apply `SKYCAST_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> std::result::Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        macro_rules! apply {
            ($key:literal, $target:expr) => {
                if let Some(raw) = lookup($key) {
                    $target = parse_override($key, &raw)?;
                }
            };
        }

        apply!("SKYCAST_HTTP_TIMEOUT", self.http.timeout_secs);
        apply!("SKYCAST_RETRY_TOTAL", self.http.retry_total);
        apply!("SKYCAST_RETRY_BACKOFF", self.http.retry_backoff_secs);
        apply!("SKYCAST_GEOCODE_TTL", self.cache.geocode_ttl_secs);
        apply!("SKYCAST_WEATHER_TTL", self.cache.weather_ttl_secs);
        apply!("SKYCAST_FORECAST_TTL", self.cache.forecast_ttl_secs);
        apply!("SKYCAST_TIMEZONE_TTL", self.cache.timezone_ttl_secs);
        apply!("SKYCAST_MAX_CACHE_ITEMS", self.cache.max_entries);
        apply!("SKYCAST_RATE_LIMIT_RPS", self.rate_limit.requests_per_second);
        apply!("SKYCAST_UNITS_DEFAULT", self.defaults.units);
        apply!("SKYCAST_LANG_DEFAULT", self.defaults.language);
        apply!("SKYCAST_LOG_LEVEL", self.log_level);
        apply!("SKYCAST_GEOCODING_URL", self.http.geocoding_url);
        apply!("SKYCAST_FORECAST_URL", self.http.forecast_url);

        Ok(())
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.http.geocoding_url, "http.geocoding_url", &mut result);
        self.validate_url(&self.http.forecast_url, "http.forecast_url", &mut result);

        if self.http.timeout_secs <= 0.0 || !fits_duration(self.http.timeout_secs) {
            result.add_error("http.timeout_secs", "Timeout must be a positive number of seconds");
        }

        if self.http.retry_total == 0 {
            result.add_error("http.retry_total", "At least one attempt is required");
        } else if self.http.retry_total > 10 {
            result.add_warning("http.retry_total", "More than 10 attempts per request");
        }

        if !fits_duration(self.http.retry_backoff_secs) {
            result.add_error(
                "http.retry_backoff_secs",
                "Backoff must be a non-negative number of seconds",
            );
        }

        if !fits_duration(self.http.max_backoff_secs) {
            result.add_error(
                "http.max_backoff_secs",
                "Backoff cap must be a non-negative number of seconds",
            );
        }

        if self.cache.weather_ttl_secs == 0 {
            result.add_warning("cache.weather_ttl_secs", "Weather caching disabled (0 seconds)");
        }

        if self.cache.max_entries == 0 {
            result.add_warning(
                "cache.max_entries",
                "Cache size is unbounded; keys grow until they expire",
            );
        }

        if self.rate_limit.requests_per_second == 0 {
            result.add_warning(
                "rate_limit.requests_per_second",
                "Outbound rate limiting disabled",
            );
        }

        if !(0.0..=1.0).contains(&self.suggestions.min_similarity) {
            result.add_error(
                "suggestions.min_similarity",
                "Similarity threshold must be between 0.0 and 1.0",
            );
        }

        if self.suggestions.candidate_count == 0 {
            result.add_error("suggestions.candidate_count", "At least one candidate is required");
        }

        if self.defaults.language.trim().is_empty() {
            result.add_error("defaults.language", "Default language must not be empty");
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}
