//! Error types shared by the skycast crates.
//!
//! Transport faults (`NetworkError`) are kept apart from what the tool layer
//! reports (`WeatherError`). Every error knows a short message that is safe
//! to hand back to an agent and whether trying again later could help.

use thiserror::Error;

/// Failure to get any HTTP response at all.
///
/// A response that did arrive is judged by its status code elsewhere, so
/// nothing here carries one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("could not connect: {0}")]
    ConnectionFailed(String),

    #[error("timed out waiting for the upstream")]
    Timeout,

    #[error("request could not be built: {0}")]
    InvalidRequest(String),

    #[error("response body unreadable: {0}")]
    InvalidResponse(String),

    #[error("tls handshake failed: {0}")]
    Tls(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to reach the weather service. Check the network connection."
            }
            NetworkError::Timeout => "The weather service took too long to respond.",
            NetworkError::InvalidRequest(_) => "The weather request could not be built.",
            NetworkError::InvalidResponse(_) => {
                "The weather service sent a response that could not be read."
            }
            NetworkError::Tls(_) => "Secure connection to the weather service failed.",
        }
    }

    /// Timeouts and dropped connections may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, NetworkError::Timeout | NetworkError::ConnectionFailed(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file is not valid TOML: {0}")]
    Malformed(String),

    #[error("environment override {key} rejected: {message}")]
    InvalidOverride { key: String, message: String },
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Malformed(_) => "The config file could not be parsed.",
            ConfigError::InvalidOverride { .. } => {
                "An environment override is malformed. Check SKYCAST_* variables."
            }
        }
    }
}

/// Weather lookup errors as seen by the tool layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WeatherError {
    #[error("invalid {field}: {message}")]
    InvalidArgument { field: String, message: String },

    #[error("no location matches '{0}'")]
    LocationNotFound(String),

    /// Retryable failure that persisted after the retry budget was spent.
    #[error("weather service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("weather API returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("weather API response not understood: {0}")]
    InvalidResponse(String),

    #[error("lookup cancelled")]
    Cancelled,
}

impl WeatherError {
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        WeatherError::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::InvalidArgument { .. } => "The request was invalid. Check the arguments.",
            WeatherError::LocationNotFound(_) => {
                "No matching city was found. Check the spelling and try again."
            }
            WeatherError::ServiceUnavailable(_) => {
                "The weather service is unavailable right now. Try again shortly."
            }
            WeatherError::ApiError { .. } => "The weather service rejected the request.",
            WeatherError::InvalidResponse(_) => "The weather service returned unreadable data.",
            WeatherError::Cancelled => "The weather lookup was cancelled.",
        }
    }

    /// Whether the caller may reasonably re-attempt the same lookup later.
    pub fn is_transient(&self) -> bool {
        matches!(self, WeatherError::ServiceUnavailable(_) | WeatherError::Cancelled)
    }
}

/// Maps a reqwest failure onto `NetworkError`.
pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        let detail = self.to_string();
        if self.is_timeout() {
            return NetworkError::Timeout;
        }
        if self.is_connect() {
            return NetworkError::ConnectionFailed(detail);
        }
        if self.is_builder() || self.is_request() {
            return NetworkError::InvalidRequest(detail);
        }
        if self.is_decode() || self.is_body() {
            return NetworkError::InvalidResponse(detail);
        }
        NetworkError::ConnectionFailed(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_name_the_override() {
        let err = ConfigError::InvalidOverride {
            key: "SKYCAST_RETRY_TOTAL".into(),
            message: "invalid digit found in string".into(),
        };
        assert!(err.to_string().contains("SKYCAST_RETRY_TOTAL"));
        assert!(!err.user_message().is_empty());
        assert!(!ConfigError::Malformed("eof".into()).user_message().is_empty());
    }

    #[test]
    fn test_only_connectivity_faults_are_transient() {
        let transient = [NetworkError::Timeout, NetworkError::ConnectionFailed("reset".into())];
        let permanent = [
            NetworkError::InvalidRequest("bad url".into()),
            NetworkError::InvalidResponse("truncated".into()),
            NetworkError::Tls("handshake".into()),
        ];
        assert!(transient.iter().all(NetworkError::is_transient));
        assert!(!permanent.iter().any(NetworkError::is_transient));
    }

    #[test]
    fn test_weather_error_transience() {
        assert!(WeatherError::ServiceUnavailable("503".into()).is_transient());
        assert!(WeatherError::Cancelled.is_transient());
        assert!(!WeatherError::ApiError {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
        assert!(!WeatherError::invalid_argument("days", "out of range").is_transient());
    }

    #[test]
    fn test_display_names_the_bad_field() {
        let err = WeatherError::invalid_argument("hours", "must be between 1 and 48");
        assert_eq!(err.to_string(), "invalid hours: must be between 1 and 48");
    }
}
