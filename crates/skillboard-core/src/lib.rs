pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod identifier;
pub mod models;
pub mod orchestrator;
pub mod rate_limiter;
pub mod retry;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cache::ProfileCache;
pub use circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use config::{OrchestratorConfig, Preset};
pub use error::{AppError, ErrorKind};
pub use identifier::{
    DEFAULT_MAX_IDENTIFIER_LEN, identifiers_from_csv, sanitize_identifiers, validate_identifier,
};
pub use models::{BatchOutcome, BatchReport, FetchResult};
pub use orchestrator::{
    BatchEvent, BatchProgress, BatchReporter, BulkFetchOrchestrator, OrchestratorStats,
    SilentReporter, TracingBatchReporter,
};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use traits::UpstreamClient;
