use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP statuses worth retrying: request timeout, throttling and gateway/server errors.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Application-wide error types for SkillBoard.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    /// The request carried no usable identifiers, or a single identifier was malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The upstream definitively reports that the identifier does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Upstream throttled us.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Circuit breaker for the endpoint is open; no call was made.
    #[error("Service temporarily unavailable: circuit '{endpoint}' open, retry after {}s", .retry_after.as_secs())]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    /// The batch was cancelled before this identifier was attempted.
    #[error("Cancelled before the request was attempted")]
    Cancelled,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::HttpError { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    /// Returns true if the upstream answered definitively, meaning the endpoint itself is healthy.
    pub fn is_definitive(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Maps the error onto the per-identifier failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::RateLimitExceeded => ErrorKind::RateLimited,
            AppError::HttpError { status: 429, .. } => ErrorKind::RateLimited,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::CircuitOpen { .. } => ErrorKind::ServiceUnavailable,
            AppError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Transient,
        }
    }
}

/// Why a single identifier failed. Carried as data inside a failed `FetchResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    RateLimited,
    Transient,
    ServiceUnavailable,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
