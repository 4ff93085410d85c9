//! Outbound request rate limiting over a sliding one-second window.
//!
//! Upstream profile APIs are unofficial or scraped and ban aggressive
//! callers, so every attempt (first tries and retries alike) takes a slot
//! here regardless of how many tasks are in flight.
//!
//! # Example
//!
//! ```rust,no_run
//! use skillboard_core::rate_limiter::RateLimiter;
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(75);
//! limiter.wait_until_allowed().await;
//! // ... perform the request
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Lower bound on a single wait, so a full window never spins.
const MIN_POLL: Duration = Duration::from_millis(2);

/// Thread-safe sliding-window limiter shared by all workers of an orchestrator.
#[derive(Clone)]
pub struct RateLimiter {
    limit: usize,
    /// Attempt timestamps inside the trailing window, oldest first.
    window: Arc<Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    /// A limiter allowing `limit_per_second` attempts per trailing second.
    /// A limit of zero is treated as one.
    pub fn new(limit_per_second: usize) -> Self {
        let limit = limit_per_second.max(1);
        Self {
            limit,
            window: Arc::new(Mutex::new(VecDeque::with_capacity(limit))),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn prune(window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// True when fewer than `limit` attempts were recorded in the last second.
    pub async fn can_proceed(&self) -> bool {
        let mut window = self.window.lock().await;
        Self::prune(&mut window, Instant::now());
        window.len() < self.limit
    }

    /// Record an attempt at the current instant.
    pub async fn record(&self) {
        self.window.lock().await.push_back(Instant::now());
    }

    /// Wait for a free slot, then record the attempt.
    ///
    /// Check and record happen under one lock acquisition so concurrent
    /// callers can never overfill the window.
    pub async fn wait_until_allowed(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                Self::prune(&mut window, now);
                if window.len() < self.limit {
                    window.push_back(now);
                    return;
                }
                // Window is full, so `front` is set.
                let oldest = window.front().copied().unwrap_or(now);
                (oldest + WINDOW).saturating_duration_since(now)
            };

            let wait = wait.max(MIN_POLL);
            tracing::debug!(wait_ms = %wait.as_millis(), "Rate window full, throttling");
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of attempts currently inside the window.
    pub async fn window_len(&self) -> usize {
        let mut window = self.window.lock().await;
        Self::prune(&mut window, Instant::now());
        window.len()
    }
}
