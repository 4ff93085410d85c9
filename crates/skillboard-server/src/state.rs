use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use skillboard_client::{HttpUpstream, SOURCE_NAMES, SourceProfile};
use skillboard_core::error::AppError;
use skillboard_core::orchestrator::BulkFetchOrchestrator;
use skillboard_core::traits::UpstreamClient;

/// Shared application state, available to all route handlers via `State<Arc<AppState<U>>>`.
///
/// Holds one orchestrator per enabled source, each with its own cache,
/// breaker and rate window.
pub struct AppState<U: UpstreamClient> {
    pub sources: BTreeMap<String, BulkFetchOrchestrator<U>>,
    pub started_at: DateTime<Utc>,
}

impl<U: UpstreamClient> Default for AppState<U> {
    fn default() -> Self {
        Self {
            sources: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }
}

impl<U: UpstreamClient> AppState<U> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, name: impl Into<String>, orchestrator: BulkFetchOrchestrator<U>) -> Self {
        self.sources.insert(name.into(), orchestrator);
        self
    }

    /// The orchestrator for `name`, or `NotFound` for a source that is not enabled.
    pub fn source(&self, name: &str) -> Result<&BulkFetchOrchestrator<U>, AppError> {
        self.sources
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| AppError::NotFound(format!("unknown source '{name}'")))
    }

    /// Start every orchestrator's cache sweeper; they stop when `cancel` fires.
    pub fn spawn_sweepers(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.sources
            .values()
            .map(|orchestrator| orchestrator.spawn_sweeper(cancel.child_token()))
            .collect()
    }
}

impl AppState<HttpUpstream> {
    /// Build one HTTP-backed orchestrator per source listed in `SKILLBOARD_SOURCES`.
    pub fn from_env() -> Result<Self, AppError> {
        let profiles = enabled_sources(std::env::var("SKILLBOARD_SOURCES").ok().as_deref())?;

        let mut state = Self::new();
        for profile in profiles {
            let config = profile.orchestrator_config()?;
            let upstream = profile.upstream(config.request_timeout)?;
            tracing::info!(
                source = profile.name,
                endpoints = ?config.endpoints,
                concurrency = config.max_concurrent_calls,
                rate_limit = config.rate_limit_per_second,
                "Source enabled"
            );
            state = state.with_source(profile.name, BulkFetchOrchestrator::new(upstream, config)?);
        }
        Ok(state)
    }
}

/// Parse a comma-separated source list; `None` or blank enables all sources.
pub fn enabled_sources(raw: Option<&str>) -> Result<Vec<SourceProfile>, AppError> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(SourceProfile::all());
    };

    let mut profiles: Vec<SourceProfile> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let profile = SourceProfile::by_name(name).ok_or_else(|| {
            AppError::ConfigError(format!(
                "Unknown source '{name}' in SKILLBOARD_SOURCES. Available: {}",
                SOURCE_NAMES.join(", ")
            ))
        })?;
        if !profiles.iter().any(|p| p.name == profile.name) {
            profiles.push(profile);
        }
    }
    Ok(profiles)
}
