use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use skillboard_core::config::OrchestratorConfig;
use skillboard_core::models::{BatchOutcome, BatchReport, FetchResult};
use skillboard_core::orchestrator::OrchestratorStats;

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub usernames: Vec<String>,
}

/// Batch counters flattened next to the per-identifier results.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    #[serde(flatten)]
    pub report: BatchReport,
    pub results: Vec<FetchResult>,
}

impl From<BatchOutcome> for BatchResponse {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            report: outcome.report,
            results: outcome.results,
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub source: String,
    pub cleared: u64,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub sources: BTreeMap<String, SourceHealth>,
}

#[derive(Debug, Serialize)]
pub struct SourceHealth {
    pub config: ConfigSummary,
    pub stats: OrchestratorStats,
}

/// The tunables worth showing an operator, in milliseconds where timed.
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub max_concurrent_calls: usize,
    pub rate_limit_per_second: usize,
    pub processing_batch_size: usize,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub cache_ttl_ms: u64,
    pub max_cache_size: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_ms: u64,
}

impl From<&OrchestratorConfig> for ConfigSummary {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_concurrent_calls: config.max_concurrent_calls,
            rate_limit_per_second: config.rate_limit_per_second,
            processing_batch_size: config.processing_batch_size,
            request_timeout_ms: config.request_timeout.as_millis() as u64,
            max_retries: config.retry.max_retries,
            retry_delay_ms: config.retry.base_delay.as_millis() as u64,
            cache_ttl_ms: config.cache_ttl.as_millis() as u64,
            max_cache_size: config.max_cache_size,
            circuit_breaker_threshold: config.breaker.failure_threshold,
            circuit_breaker_cooldown_ms: config.breaker.cooldown.as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
