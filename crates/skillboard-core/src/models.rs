use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, ErrorKind};

/// Outcome of fetching one identifier.
///
/// Serialized with a `status` tag so the JSON shape matches what the
/// dashboard already consumes: `{"status": "success", "identifier", "data"}`
/// or `{"status": "error", "identifier", "reason", "message"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FetchResult {
    Success {
        identifier: String,
        /// Raw upstream payload, left unmodified.
        data: serde_json::Value,
    },
    #[serde(rename = "error")]
    Failure {
        identifier: String,
        reason: ErrorKind,
        message: String,
    },
}

impl FetchResult {
    pub fn success(identifier: impl Into<String>, data: serde_json::Value) -> Self {
        FetchResult::Success {
            identifier: identifier.into(),
            data,
        }
    }

    pub fn failure(identifier: impl Into<String>, error: &AppError) -> Self {
        FetchResult::Failure {
            identifier: identifier.into(),
            reason: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            FetchResult::Success { identifier, .. } | FetchResult::Failure { identifier, .. } => {
                identifier
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    pub fn reason(&self) -> Option<ErrorKind> {
        match self {
            FetchResult::Success { .. } => None,
            FetchResult::Failure { reason, .. } => Some(*reason),
        }
    }

    /// Successes and definitive "not found" answers are worth caching;
    /// transient failures must not poison the cache.
    pub fn is_cacheable(&self) -> bool {
        match self {
            FetchResult::Success { .. } => true,
            FetchResult::Failure { reason, .. } => *reason == ErrorKind::NotFound,
        }
    }
}

/// Aggregate counters for one submitted batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl BatchReport {
    /// Profiles per second over the whole batch.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total as f64 / secs
        } else {
            self.total as f64
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Results of a batch, in deduplicated input order, plus its report.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<FetchResult>,
    pub report: BatchReport,
}
