//! Resilient upstream fetcher.
//!
//! The fetcher owns no connection state of its own: a [`Transport`] is
//! injected at construction and shared by every lookup. [`HttpTransport`]
//! wraps one pooled `reqwest::Client`; tests substitute scripted transports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use skycast_core::{HttpConfig, NetworkError, ReqwestErrorExt, WeatherError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;

use crate::retry::{RetryDecision, RetryPolicy};

/// Characters of an error body kept for diagnostics.
const ERROR_SNIPPET_LEN: usize = 200;

/// One upstream GET: endpoint plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    url: Url,
    query: Vec<(String, String)>,
}

impl ApiRequest {
    /// Request for `path` relative to `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidRequest`] when the URL does not parse.
    pub fn get(base_url: &str, path: &str) -> Result<Self, NetworkError> {
        let base = Url::parse(base_url)
            .map_err(|e| NetworkError::InvalidRequest(format!("{}: {}", base_url, e)))?;
        let url = base
            .join(path)
            .map_err(|e| NetworkError::InvalidRequest(format!("{}: {}", path, e)))?;
        Ok(Self {
            url,
            query: Vec::new(),
        })
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Full URL with the query string applied.
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        url
    }
}

/// Raw upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    fn snippet(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        text.chars().take(ERROR_SNIPPET_LEN).collect()
    }
}

/// Single-attempt HTTP transport. Must be safe to share between tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &ApiRequest) -> Result<HttpResponse, NetworkError>;
}

/// Transport backed by one pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(ReqwestErrorExt::into_network_error)?;
        Ok(Self { client })
    }

    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn from_config(http: &HttpConfig) -> Result<Self, NetworkError> {
        Self::new(http.timeout(), &http.user_agent)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: &ApiRequest) -> Result<HttpResponse, NetworkError> {
        let response = self
            .client
            .get(request.url().clone())
            .query(request.query_pairs())
            .send()
            .await
            .map_err(ReqwestErrorExt::into_network_error)?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(ReqwestErrorExt::into_network_error)?;

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

/// Failure of one logical fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether a later call could succeed without any change to the request.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            FetchError::Network(e) => e.is_transient(),
            FetchError::Exhausted { .. } | FetchError::Cancelled => true,
            FetchError::Decode(_) => false,
        }
    }
}

impl From<FetchError> for WeatherError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Cancelled => WeatherError::Cancelled,
            FetchError::Decode(message) => WeatherError::InvalidResponse(message),
            FetchError::Network(NetworkError::InvalidResponse(message)) => {
                WeatherError::InvalidResponse(message)
            }
            error if error.is_transient() => WeatherError::ServiceUnavailable(error.to_string()),
            FetchError::Status { status, message } => WeatherError::ApiError {
                status: status.as_u16(),
                message,
            },
            // Status 0 marks a failure that never produced an HTTP response.
            other => WeatherError::ApiError {
                status: 0,
                message: other.to_string(),
            },
        }
    }
}

/// Issues requests through a shared transport, retrying transient failures.
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("policy", &self.policy)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl ResilientFetcher {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            transport,
            policy,
            attempt_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Performs the request, retrying per the policy.
    ///
    /// # Errors
    ///
    /// Non-retryable failures are returned from the attempt that produced
    /// them. Retryable failures that outlast the policy are wrapped in
    /// [`FetchError::Exhausted`]. Cancellation yields [`FetchError::Cancelled`].
    #[instrument(skip(self, cancel), fields(url = %request.url()), level = "debug")]
    pub async fn fetch(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let failure = match self.attempt_once(request, cancel).await {
                Ok(response) if response.status.is_success() => {
                    if attempt > 1 {
                        tracing::info!("Request succeeded after {} retries", attempt - 1);
                    }
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status;
                    let failure = FetchError::Status {
                        status,
                        message: response.snippet(),
                    };
                    if self.policy.classify_status(status) == RetryDecision::NoRetry {
                        tracing::debug!("Non-retryable status {}", status);
                        return Err(failure);
                    }
                    failure
                }
                Err(FetchError::Network(error)) => {
                    if self.policy.classify_error(&error) == RetryDecision::NoRetry {
                        tracing::debug!("Non-retryable error: {}", error);
                        return Err(FetchError::Network(error));
                    }
                    FetchError::Network(error)
                }
                Err(other) => return Err(other),
            };

            if attempt >= max_attempts {
                tracing::error!("All {} attempts exhausted: {}", max_attempts, failure);
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }

            let delay = self.policy.delay_for_retry(attempt);
            tracing::warn!(
                "Retryable failure on attempt {} of {}: {}; retrying in {:?}",
                attempt,
                max_attempts,
                failure,
                delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Fetches and decodes a JSON body.
    ///
    /// # Errors
    ///
    /// As [`ResilientFetcher::fetch`], plus [`FetchError::Decode`] for a body
    /// that does not match `T`.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        let response = self.fetch(request, cancel).await?;
        serde_json::from_slice(&response.body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn attempt_once(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(self.attempt_timeout, self.transport.get(request)) => {
                match result {
                    Ok(response) => response.map_err(FetchError::Network),
                    Err(_) => Err(FetchError::Network(NetworkError::Timeout)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::test_support::ScriptedTransport;
    use tokio::time::Instant;

    fn request() -> ApiRequest {
        ApiRequest::get("http://weather.test", "/v1/forecast")
            .unwrap()
            .query("latitude", 29.56)
    }

    fn fetcher(transport: &Arc<ScriptedTransport>, max_attempts: u32) -> ResilientFetcher {
        ResilientFetcher::new(
            transport.clone(),
            RetryPolicy::new(max_attempts, Duration::from_millis(100), Duration::from_secs(5)),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_full_url_includes_query() {
        let req = ApiRequest::get("https://api.open-meteo.com", "/v1/forecast")
            .unwrap()
            .query("latitude", 1.5)
            .query("current_weather", true);
        assert_eq!(
            req.full_url().as_str(),
            "https://api.open-meteo.com/v1/forecast?latitude=1.5&current_weather=true"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = ApiRequest::get("not a url", "/v1/search").unwrap_err();
        assert!(matches!(err, NetworkError::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt_after_two_retries() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(NetworkError::Timeout),
            Ok(HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE, "busy")),
            Ok(HttpResponse::new(StatusCode::OK, "{}")),
        ]));
        let start = Instant::now();

        let response = fetcher(&transport, 3)
            .fetch(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.calls(), 3);
        // two retries: 100ms then 200ms
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_stops_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::repeating(Ok(HttpResponse::new(
            StatusCode::BAD_GATEWAY,
            "upstream down",
        ))));

        let err = fetcher(&transport, 3)
            .fetch(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 3);
        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("502"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_fails_immediately() {
        let transport = Arc::new(ScriptedTransport::repeating(Ok(HttpResponse::new(
            StatusCode::BAD_REQUEST,
            r#"{"error":true,"reason":"Parameter 'latitude' is out of range"}"#,
        ))));
        let start = Instant::now();

        let err = fetcher(&transport, 5)
            .fetch(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(err, FetchError::Status { status, .. } if status == StatusCode::BAD_REQUEST));
        assert!(!err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::repeating(Err(
            NetworkError::InvalidRequest("bad header".into()),
        )));

        let err = fetcher(&transport, 3)
            .fetch(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert!(matches!(err, FetchError::Network(NetworkError::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_hits_attempt_timeout() {
        let transport = Arc::new(
            ScriptedTransport::repeating(Ok(HttpResponse::new(StatusCode::OK, "{}")))
                .with_latency(Duration::from_secs(30)),
        );
        let fetcher = ResilientFetcher::new(
            transport.clone(),
            RetryPolicy::new(2, Duration::from_millis(100), Duration::from_secs(1)),
            Duration::from_secs(1),
        );

        let err = fetcher
            .fetch(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 2);
        match err {
            FetchError::Exhausted { last, .. } => {
                assert!(matches!(*last, FetchError::Network(NetworkError::Timeout)));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_returns_promptly() {
        let transport = Arc::new(ScriptedTransport::repeating(Err(NetworkError::Timeout)));
        let fetcher = fetcher(&transport, 5);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let start = Instant::now();
        let err = fetcher.fetch(&request(), &cancel).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(start.elapsed(), Duration::from_millis(50));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_json_decode_error_is_permanent() {
        let transport = Arc::new(ScriptedTransport::repeating(Ok(HttpResponse::new(
            StatusCode::OK,
            "<html>not json</html>",
        ))));

        let err = fetcher(&transport, 3)
            .fetch_json::<serde_json::Value>(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Decode(_)));
        assert!(!err.is_transient());
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_weather_error_mapping() {
        let exhausted = FetchError::Exhausted {
            attempts: 3,
            last: Box::new(FetchError::Network(NetworkError::Timeout)),
        };
        assert!(matches!(
            WeatherError::from(exhausted),
            WeatherError::ServiceUnavailable(_)
        ));

        let rejected = FetchError::Status {
            status: StatusCode::BAD_REQUEST,
            message: "bad".into(),
        };
        assert_eq!(
            WeatherError::from(rejected),
            WeatherError::ApiError {
                status: 400,
                message: "bad".into()
            }
        );

        let tls = FetchError::Network(NetworkError::Tls("handshake".into()));
        assert!(matches!(
            WeatherError::from(tls),
            WeatherError::ApiError { status: 0, .. }
        ));

        assert_eq!(
            WeatherError::from(FetchError::Decode("eof".into())),
            WeatherError::InvalidResponse("eof".into())
        );
        assert_eq!(WeatherError::from(FetchError::Cancelled), WeatherError::Cancelled);
    }
}
