//! Per-endpoint circuit breaker for upstream profile APIs.
//!
//! Stops hammering an upstream that keeps failing, so a dead mirror turns
//! into fast `ServiceUnavailable` results instead of a batch full of timeouts.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[threshold failures]--> OPEN (rejecting) --[cooldown since trip]--> CLOSED
//! ```
//!
//! Successes drain the failure count one step at a time, so isolated
//! failures amid mostly-successful traffic never trip the breaker. The
//! cooldown is measured from the moment the circuit opened and is evaluated
//! lazily on read; no timer is scheduled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;

/// Current state of one endpoint's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected without touching the network.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure count at which the circuit opens.
    pub failure_threshold: u32,

    /// How long an open circuit rejects requests before resetting.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 50,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Health record for one endpoint.
#[derive(Debug, Default)]
struct EndpointHealth {
    failure_count: u32,
    opened_at: Option<Instant>,
    last_error_message: Option<String>,
}

/// Statistics about one endpoint's circuit, for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_error: Option<String>,
    #[serde(rename = "retry_after_ms", serialize_with = "serialize_opt_millis")]
    pub retry_after: Option<Duration>,
}

fn serialize_opt_millis<S: serde::Serializer>(
    d: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&(d.as_millis() as u64)),
        None => s.serialize_none(),
    }
}

/// Thread-safe registry of circuits keyed by endpoint name.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    endpoints: Arc<Mutex<HashMap<String, EndpointHealth>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            endpoints: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Acquires the registry lock, recovering from poison if necessary.
    fn lock_endpoints(&self) -> std::sync::MutexGuard<'_, HashMap<String, EndpointHealth>> {
        self.endpoints.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned circuit breaker mutex");
            poisoned.into_inner()
        })
    }

    /// Resets an open circuit whose cooldown has elapsed.
    fn maybe_reset(&self, name: &str, health: &mut EndpointHealth, now: Instant) {
        if let Some(opened_at) = health.opened_at
            && now.duration_since(opened_at) >= self.config.cooldown
        {
            tracing::info!(circuit = %name, "Circuit breaker reset after cooldown");
            health.failure_count = 0;
            health.opened_at = None;
            health.last_error_message = None;
        }
    }

    fn retry_after(&self, health: &EndpointHealth, now: Instant) -> Option<Duration> {
        health.opened_at.map(|opened_at| {
            self.config
                .cooldown
                .saturating_sub(now.duration_since(opened_at))
        })
    }

    /// True while the endpoint's circuit is open.
    pub fn should_break(&self, endpoint: &str) -> bool {
        self.state(endpoint) == CircuitState::Open
    }

    /// Returns `Err(CircuitOpen)` when the endpoint must be short-circuited.
    pub fn check(&self, endpoint: &str) -> Result<(), AppError> {
        let mut endpoints = self.lock_endpoints();
        let Some(health) = endpoints.get_mut(endpoint) else {
            return Ok(());
        };
        let now = Instant::now();
        self.maybe_reset(endpoint, health, now);
        match self.retry_after(health, now) {
            Some(retry_after) => Err(AppError::CircuitOpen {
                endpoint: endpoint.to_string(),
                retry_after,
            }),
            None => Ok(()),
        }
    }

    /// Returns the current state, applying a pending cooldown reset.
    pub fn state(&self, endpoint: &str) -> CircuitState {
        let mut endpoints = self.lock_endpoints();
        match endpoints.get_mut(endpoint) {
            Some(health) => {
                self.maybe_reset(endpoint, health, Instant::now());
                if health.opened_at.is_some() {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                }
            }
            None => CircuitState::Closed,
        }
    }

    pub fn record_failure(&self, endpoint: &str, error: &AppError) {
        let mut endpoints = self.lock_endpoints();
        let health = endpoints.entry(endpoint.to_string()).or_default();
        let now = Instant::now();
        self.maybe_reset(endpoint, health, now);

        health.failure_count = health.failure_count.saturating_add(1);
        health.last_error_message = Some(error.to_string());

        if health.opened_at.is_none() && health.failure_count >= self.config.failure_threshold {
            tracing::warn!(
                circuit = %endpoint,
                failures = health.failure_count,
                error = %error,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Circuit breaker tripped"
            );
            health.opened_at = Some(now);
        } else {
            tracing::debug!(
                circuit = %endpoint,
                failures = health.failure_count,
                threshold = self.config.failure_threshold,
                "Recorded upstream failure"
            );
        }
    }

    /// Drains the failure count by one; an open circuit still waits out its cooldown.
    pub fn record_success(&self, endpoint: &str) {
        let mut endpoints = self.lock_endpoints();
        if let Some(health) = endpoints.get_mut(endpoint) {
            self.maybe_reset(endpoint, health, Instant::now());
            health.failure_count = health.failure_count.saturating_sub(1);
        }
    }

    pub fn reset(&self, endpoint: &str) {
        let mut endpoints = self.lock_endpoints();
        if endpoints.remove(endpoint).is_some() {
            tracing::info!(circuit = %endpoint, "Circuit breaker manually reset");
        }
    }

    pub fn stats(&self, endpoint: &str) -> CircuitBreakerStats {
        let mut endpoints = self.lock_endpoints();
        let now = Instant::now();
        match endpoints.get_mut(endpoint) {
            Some(health) => {
                self.maybe_reset(endpoint, health, now);
                CircuitBreakerStats {
                    name: endpoint.to_string(),
                    state: if health.opened_at.is_some() {
                        CircuitState::Open
                    } else {
                        CircuitState::Closed
                    },
                    failure_count: health.failure_count,
                    last_error: health.last_error_message.clone(),
                    retry_after: self.retry_after(health, now),
                }
            }
            None => CircuitBreakerStats {
                name: endpoint.to_string(),
                state: CircuitState::Closed,
                failure_count: 0,
                last_error: None,
                retry_after: None,
            },
        }
    }

    /// Stats for every endpoint that has recorded activity, sorted by name.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut names: Vec<String> = self.lock_endpoints().keys().cloned().collect();
        names.sort();
        names.iter().map(|name| self.stats(name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, cooldown: Duration) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown,
        })
    }

    fn net_err() -> AppError {
        AppError::NetworkError("connection reset".into())
    }

    #[test]
    fn test_unknown_endpoint_is_closed() {
        let cb = registry(3, Duration::from_secs(30));
        assert_eq!(cb.state("codechef"), CircuitState::Closed);
        assert!(cb.check("codechef").is_ok());
    }

    #[test]
    fn test_circuit_opens_at_threshold() {
        let cb = registry(3, Duration::from_secs(30));
        for _ in 0..2 {
            cb.record_failure("codechef", &net_err());
        }
        assert!(!cb.should_break("codechef"));

        cb.record_failure("codechef", &net_err());
        assert!(cb.should_break("codechef"));
        assert!(matches!(
            cb.check("codechef"),
            Err(AppError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_zero_threshold_trips_on_first_failure() {
        let cb = registry(0, Duration::from_secs(30));
        assert!(cb.check("codechef").is_ok());

        cb.record_failure("codechef", &net_err());
        assert!(cb.should_break("codechef"));
        assert!(matches!(
            cb.check("codechef"),
            Err(AppError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_endpoints_are_independent() {
        let cb = registry(1, Duration::from_secs(30));
        cb.record_failure("leetcode", &net_err());
        assert!(cb.should_break("leetcode"));
        assert!(!cb.should_break("github"));
    }

    #[test]
    fn test_success_decrements_gradually() {
        let cb = registry(3, Duration::from_secs(30));
        cb.record_failure("codechef", &net_err());
        cb.record_failure("codechef", &net_err());
        cb.record_success("codechef");
        assert_eq!(cb.stats("codechef").failure_count, 1);

        cb.record_success("codechef");
        cb.record_success("codechef");
        assert_eq!(cb.stats("codechef").failure_count, 0);

        // Two more failures stay below the threshold of three.
        cb.record_failure("codechef", &net_err());
        cb.record_failure("codechef", &net_err());
        assert_eq!(cb.state("codechef"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_resets_after_cooldown() {
        let cb = registry(2, Duration::from_secs(30));
        cb.record_failure("codechef", &net_err());
        cb.record_failure("codechef", &net_err());
        assert_eq!(cb.state("codechef"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state("codechef"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state("codechef"), CircuitState::Closed);
        assert_eq!(cb.stats("codechef").failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_counts_from_trip_not_last_failure() {
        let cb = registry(1, Duration::from_secs(30));
        cb.record_failure("codechef", &net_err());

        tokio::time::advance(Duration::from_secs(20)).await;
        cb.record_failure("codechef", &net_err());
        assert!(cb.should_break("codechef"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!cb.should_break("codechef"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_while_open_does_not_close() {
        let cb = registry(1, Duration::from_secs(30));
        cb.record_failure("codechef", &net_err());
        cb.record_success("codechef");
        assert!(cb.should_break("codechef"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_retry_after() {
        let cb = registry(1, Duration::from_secs(30));
        cb.record_failure("codechef", &AppError::RateLimitExceeded);
        tokio::time::advance(Duration::from_secs(10)).await;

        let stats = cb.stats("codechef");
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.retry_after, Some(Duration::from_secs(20)));
        assert_eq!(stats.last_error.as_deref(), Some("Rate limit exceeded"));
    }

    #[test]
    fn test_manual_reset() {
        let cb = registry(1, Duration::from_secs(300));
        cb.record_failure("codechef", &net_err());
        assert_eq!(cb.state("codechef"), CircuitState::Open);

        cb.reset("codechef");
        assert_eq!(cb.state("codechef"), CircuitState::Closed);
        assert!(cb.all_stats().is_empty());
    }
}
