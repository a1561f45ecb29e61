//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use skycast_core::NetworkError;

use crate::fetch::{ApiRequest, HttpResponse, Transport};

type Scripted = Result<HttpResponse, NetworkError>;

/// Replays queued results in order, then repeats the fallback (if any).
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    latency: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback: None,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(result: Scripted) -> Self {
        Self {
            fallback: Some(result),
            ..Self::new(Vec::new())
        }
    }

    /// Always answers 200 with `body`.
    pub fn json(body: &str) -> Self {
        Self::repeating(Ok(HttpResponse::new(StatusCode::OK, body)))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, request: &ApiRequest) -> Result<HttpResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.queue.lock().pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => Err(NetworkError::ConnectionFailed("script exhausted".into())),
        }
    }
}
