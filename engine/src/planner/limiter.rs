//! Sliding-window rate limiter for reasoning-service calls
//!
//! One limiter is shared by every component that talks to the backend
//! (workers, the analyzer). The window holds the timestamps of recent
//! calls; a caller acquires a slot by waiting until the oldest call ages
//! out, or gives up when its own deadline would pass first.

use sdk::errors::AgentError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    max_calls: u32,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Acquires one call slot, waiting if the window is full.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Transient` when the wait would exceed
    /// `deadline`; the caller's retry policy decides what happens next.
    pub async fn acquire(&self, deadline: Duration) -> Result<(), AgentError> {
        let started = Instant::now();
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.window)
                {
                    calls.pop_front();
                }

                if (calls.len() as u32) < self.max_calls {
                    calls.push_back(now);
                    return Ok(());
                }

                // Safe: the deque is non-empty when the window is full
                let oldest = *calls.front().ok_or_else(|| {
                    AgentError::Transient("rate limiter window empty while full".to_string())
                })?;
                self.window - now.duration_since(oldest)
            };

            if started.elapsed() + wait > deadline {
                return Err(AgentError::Transient(format!(
                    "rate limit wait of {:?} exceeds deadline",
                    wait
                )));
            }

            debug!(?wait, "rate limit window full, waiting for a slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls currently inside the window.
    pub async fn in_flight(&self) -> usize {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        while calls
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            calls.pop_front();
        }
        calls.len()
    }
}
