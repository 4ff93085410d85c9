use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::identifier::DEFAULT_MAX_IDENTIFIER_LEN;
use crate::retry::RetryPolicy;

/// Tuning for one bulk fetch orchestrator (one upstream source).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Name the circuit breaker tracks this upstream under.
    pub endpoint_name: String,
    /// Mirror URL templates for the same logical resource, tried in order.
    pub endpoints: Vec<String>,
    /// Ceiling on in-flight upstream calls.
    pub max_concurrent_calls: usize,
    /// Ceiling on attempts started per trailing second.
    pub rate_limit_per_second: usize,
    /// Identifiers per processing chunk. Chunking only groups progress
    /// reporting; throttling is the rate limiter's job.
    pub processing_batch_size: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_ttl: Duration,
    pub max_cache_size: u64,
    pub cache_sweep_interval: Duration,
    pub breaker: CircuitBreakerConfig,
    pub max_identifier_len: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            endpoint_name: "upstream".to_string(),
            endpoints: Vec::new(),
            max_concurrent_calls: 150,
            rate_limit_per_second: 75,
            processing_batch_size: 100,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            cache_ttl: Duration::from_secs(600),
            max_cache_size: 50_000,
            cache_sweep_interval: Duration::from_secs(60),
            breaker: CircuitBreakerConfig::default(),
            max_identifier_len: DEFAULT_MAX_IDENTIFIER_LEN,
        }
    }
}

impl OrchestratorConfig {
    pub fn new<S: Into<String>>(
        endpoint_name: impl Into<String>,
        endpoints: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Read configuration from environment variables, falling back to defaults.
    ///
    /// - `SKILLBOARD_<NAME>_ENDPOINTS` (comma separated mirror templates)
    /// - `SKILLBOARD_MAX_CONCURRENT_CALLS`
    /// - `SKILLBOARD_RATE_LIMIT_PER_SECOND`
    /// - `SKILLBOARD_PROCESSING_BATCH_SIZE`
    /// - `SKILLBOARD_REQUEST_TIMEOUT_MS`
    /// - `SKILLBOARD_MAX_RETRIES`
    /// - `SKILLBOARD_RETRY_DELAY_MS`
    /// - `SKILLBOARD_CACHE_DURATION_MS`
    /// - `SKILLBOARD_MAX_CACHE_SIZE`
    /// - `SKILLBOARD_CIRCUIT_BREAKER_THRESHOLD`
    /// - `SKILLBOARD_CIRCUIT_BREAKER_COOLDOWN_MS`
    pub fn from_env<S: Into<String>>(
        endpoint_name: &str,
        default_endpoints: impl IntoIterator<Item = S>,
    ) -> Result<Self, AppError> {
        Self::from_lookup(endpoint_name, default_endpoints, |key| {
            std::env::var(key).ok()
        })
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<S, F>(
        endpoint_name: &str,
        default_endpoints: impl IntoIterator<Item = S>,
        lookup: F,
    ) -> Result<Self, AppError>
    where
        S: Into<String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(endpoint_name, default_endpoints);

        let endpoints_key = format!(
            "SKILLBOARD_{}_ENDPOINTS",
            endpoint_name.to_ascii_uppercase().replace('-', "_")
        );
        if let Some(raw) = lookup(&endpoints_key) {
            let mirrors: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if mirrors.is_empty() {
                return Err(AppError::ConfigError(format!(
                    "{endpoints_key} is set but lists no endpoints"
                )));
            }
            config.endpoints = mirrors;
        }

        let parse = |key: &str| -> Result<Option<u64>, AppError> {
            match lookup(key) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid {key} '{raw}': must be a non-negative integer"
                    ))
                }),
            }
        };

        if let Some(v) = parse("SKILLBOARD_MAX_CONCURRENT_CALLS")? {
            config.max_concurrent_calls = v as usize;
        }
        if let Some(v) = parse("SKILLBOARD_RATE_LIMIT_PER_SECOND")? {
            config.rate_limit_per_second = v as usize;
        }
        if let Some(v) = parse("SKILLBOARD_PROCESSING_BATCH_SIZE")? {
            config.processing_batch_size = v as usize;
        }
        if let Some(v) = parse("SKILLBOARD_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse("SKILLBOARD_MAX_RETRIES")? {
            config.retry.max_retries = v as u32;
        }
        if let Some(v) = parse("SKILLBOARD_RETRY_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse("SKILLBOARD_CACHE_DURATION_MS")? {
            config.cache_ttl = Duration::from_millis(v);
        }
        if let Some(v) = parse("SKILLBOARD_MAX_CACHE_SIZE")? {
            config.max_cache_size = v;
        }
        if let Some(v) = parse("SKILLBOARD_CIRCUIT_BREAKER_THRESHOLD")? {
            config.breaker.failure_threshold = v as u32;
        }
        if let Some(v) = parse("SKILLBOARD_CIRCUIT_BREAKER_COOLDOWN_MS")? {
            config.breaker.cooldown = Duration::from_millis(v);
        }

        if config.max_concurrent_calls == 0 {
            return Err(AppError::ConfigError(
                "SKILLBOARD_MAX_CONCURRENT_CALLS must be at least 1".into(),
            ));
        }

        Ok(config)
    }

    /// Overlay a preset's throughput and retry settings.
    pub fn with_preset(mut self, preset: Preset) -> Self {
        let (concurrency, rate, retries, retry_delay_ms, timeout_secs) = match preset {
            Preset::Conservative => (10, 5, 3, 3000, 40),
            Preset::Balanced => (50, 25, 2, 2000, 30),
            Preset::Aggressive => (150, 75, 2, 150, 15),
            Preset::Testing => (4, 2, 1, 1000, 20),
        };
        self.max_concurrent_calls = concurrency;
        self.rate_limit_per_second = rate;
        self.retry.max_retries = retries;
        self.retry.base_delay = Duration::from_millis(retry_delay_ms);
        self.request_timeout = Duration::from_secs(timeout_secs);
        self
    }

    pub fn with_endpoints<S: Into<String>>(mut self, endpoints: impl IntoIterator<Item = S>) -> Self {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrent_calls(mut self, n: usize) -> Self {
        self.max_concurrent_calls = n;
        self
    }

    pub fn with_rate_limit_per_second(mut self, n: usize) -> Self {
        self.rate_limit_per_second = n;
        self
    }

    pub fn with_processing_batch_size(mut self, n: usize) -> Self {
        self.processing_batch_size = n;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache(mut self, ttl: Duration, max_size: u64) -> Self {
        self.cache_ttl = ttl;
        self.max_cache_size = max_size;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Human-readable warnings for settings that are likely mistakes.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.endpoints.is_empty() {
            warnings.push(format!("no endpoints configured for '{}'", self.endpoint_name));
        }
        if self.max_concurrent_calls == 0 {
            warnings.push("max_concurrent_calls must be at least 1".to_string());
        }
        if self.rate_limit_per_second == 0 {
            warnings.push("rate_limit_per_second of 0 is clamped to 1".to_string());
        }
        if self.processing_batch_size == 0 {
            warnings.push("processing_batch_size of 0 is clamped to 1".to_string());
        }
        if self.retry.max_retries > 5 {
            warnings.push("max_retries > 5 may cause long wait times on failures".to_string());
        }
        if self.request_timeout < Duration::from_secs(1) {
            warnings.push("request_timeout < 1s may cause premature timeouts".to_string());
        }
        if self.breaker.failure_threshold == 0 {
            warnings.push("circuit breaker threshold of 0 trips on the first failure".to_string());
        }
        warnings
    }
}

/// Named throughput profiles for bulk runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Slowest and safest; for unstable networks or strict upstreams.
    Conservative,
    Balanced,
    /// Fastest; for large batches against a tolerant upstream.
    Aggressive,
    Testing,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Conservative => "conservative",
            Preset::Balanced => "balanced",
            Preset::Aggressive => "aggressive",
            Preset::Testing => "testing",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(Preset::Conservative),
            "balanced" => Ok(Preset::Balanced),
            "aggressive" => Ok(Preset::Aggressive),
            "testing" => Ok(Preset::Testing),
            _ => Err(format!(
                "Unknown preset: {s}. Available: conservative, balanced, aggressive, testing"
            )),
        }
    }
}
