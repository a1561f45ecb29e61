//! Retry policy for upstream HTTP calls with exponential backoff.
//!
//! Retried:
//! - Timeouts and connection failures
//! - 5xx server errors
//! - 408 Request Timeout and 429 Too Many Requests
//!
//! Not retried:
//! - Other 4xx client errors
//! - Requests that could not be built, TLS failures, malformed bodies

use std::time::Duration;

use reqwest::StatusCode;
use skycast_core::{HttpConfig, NetworkError};

/// Default retry configuration
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 300;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;
pub const DEFAULT_RETRY_STATUSES: [u16; 2] = [408, 429];

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for one logical call, first attempt included
    pub max_attempts: u32,
    /// Delay before the first retry (doubles for each later retry)
    pub backoff_base: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Client-error statuses that are still worth retrying
    pub retry_on_status: Vec<u16>,
    pub retry_on_server_error: bool,
    pub retry_on_timeout: bool,
    pub retry_on_connect: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            retry_on_status: DEFAULT_RETRY_STATUSES.to_vec(),
            retry_on_server_error: true,
            retry_on_timeout: true,
            retry_on_connect: true,
        }
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Should retry the request
    Retry,
    /// Should not retry - permanent failure
    NoRetry,
}

impl RetryPolicy {
    /// Create a policy with custom attempt count and backoff
    pub fn new(max_attempts: u32, backoff_base: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            max_delay,
            ..Self::default()
        }
    }

    pub fn from_config(http: &HttpConfig) -> Self {
        Self::new(http.retry_total, http.retry_backoff(), http.max_backoff())
    }

    /// Single attempt, nothing retried.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 2u32.saturating_pow(exponent);
        self.backoff_base.saturating_mul(factor).min(self.max_delay)
    }

    /// Check if a response status is retryable
    pub fn classify_status(&self, status: StatusCode) -> RetryDecision {
        if status.is_server_error() {
            return if self.retry_on_server_error {
                tracing::debug!("Server error ({}), will retry", status);
                RetryDecision::Retry
            } else {
                RetryDecision::NoRetry
            };
        }

        if self.retry_on_status.contains(&status.as_u16()) {
            tracing::debug!("Retryable status ({}), will retry", status);
            return RetryDecision::Retry;
        }

        // Success codes and remaining client errors are final
        RetryDecision::NoRetry
    }

    /// Check if a transport error is retryable
    pub fn classify_error(&self, error: &NetworkError) -> RetryDecision {
        match error {
            NetworkError::Timeout if self.retry_on_timeout => {
                tracing::debug!("Request timed out, will retry");
                RetryDecision::Retry
            }
            NetworkError::ConnectionFailed(_) if self.retry_on_connect => {
                tracing::debug!("Connection error, will retry");
                RetryDecision::Retry
            }
            _ => RetryDecision::NoRetry,
        }
    }
}
