use std::time::Duration;

use crate::error::AppError;

/// Retry schedule for a single identifier.
///
/// Delay before retry `n` (0-indexed) is
/// `min(base_delay * backoff_factor^n + jitter, max_delay)`, with jitter
/// uniform in `[0, base_delay / 5)` so identifiers that failed together do
/// not retry in lockstep.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(150),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether a failure at `attempt` (0-indexed) earns another try.
    pub fn should_retry(&self, error: &AppError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exp = base_ms * self.backoff_factor.powi(attempt as i32);
        let jitter = rand_jitter_ms((base_ms * 0.2) as u64) as f64;
        let total_us = ((exp + jitter) * 1000.0).round().max(0.0);
        if total_us >= self.max_delay.as_micros() as f64 {
            return self.max_delay;
        }
        Duration::from_micros(total_us as u64)
    }
}

// ---------------------------------------------------------------------------
// Jitter based on std, seeded from the clock. Not suitable for anything but
// spreading out retries.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
