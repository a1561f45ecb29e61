//! Sliding-window limiter for outbound requests.
//!
//! Admission timestamps live in a deque ordered oldest-first. Every
//! admission prunes entries that have left the window, then either records
//! `now` or reports how long until the oldest entry leaves. Check and record
//! happen under one lock, so two callers can never both take the last slot.
//! Waiting happens with the lock released and is followed by a fresh check:
//! a waiter that gives up has recorded nothing.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Returned when a wait for a slot is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// At most `requests_per_second` admissions in any trailing second.
    /// Zero disables limiting.
    pub fn new(requests_per_second: u32) -> Self {
        Self::with_window(requests_per_second, Duration::from_secs(1))
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        let limit = limit as usize;
        Self {
            limit,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Waits until one more request fits in the window, then records it.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] as soon as `cancel` fires; no slot is taken.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if !self.is_enabled() {
            return Ok(());
        }

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            let wait = match self.try_admit(Instant::now()) {
                None => return Ok(()),
                Some(wait) => wait,
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Admissions currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, Instant::now());
        admitted.len()
    }

    /// Records `now` and returns `None`, or returns the wait until a slot frees.
    fn try_admit(&self, now: Instant) -> Option<Duration> {
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, now);

        if admitted.len() < self.limit {
            admitted.push_back(now);
            return None;
        }

        let oldest = admitted.front().copied()?;
        Some(self.window.saturating_sub(now.duration_since(oldest)))
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admitted.front() {
            if now.duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}
