//! Shared configuration, error taxonomy and logging setup for skycast.

pub mod config;
pub mod error;

pub use config::{
    CacheConfig, Config, ConfigValidationError, DefaultsConfig, HttpConfig, RateLimitConfig,
    SuggestionConfig, Units, ValidationResult,
};
pub use error::{ConfigError, NetworkError, ReqwestErrorExt, WeatherError};

use anyhow::Result;

/// Initialize tracing/logging.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (usually
/// `Config::log_level`) is used.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("skycast core initialized");
    Ok(())
}
