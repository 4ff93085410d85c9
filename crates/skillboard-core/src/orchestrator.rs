use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::ProfileCache;
use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerStats};
use crate::config::OrchestratorConfig;
use crate::error::AppError;
use crate::identifier::{sanitize_identifiers, validate_identifier};
use crate::models::{BatchOutcome, BatchReport, FetchResult};
use crate::rate_limiter::RateLimiter;
use crate::traits::UpstreamClient;

/// Events emitted while a batch runs, for monitoring/logging.
#[derive(Debug, Clone)]
pub enum BatchEvent<'a> {
    Started {
        batch_id: Uuid,
        total: usize,
        chunks: usize,
    },
    ItemCompleted {
        batch_id: Uuid,
        result: &'a FetchResult,
        cache_hit: bool,
        completed: usize,
        total: usize,
    },
    /// Every identifier of chunk `chunk` (1-based) has a result.
    ChunkCompleted {
        batch_id: Uuid,
        chunk: usize,
        chunks: usize,
    },
    Finished {
        report: &'a BatchReport,
    },
}

/// Trait for receiving batch events (decoupled logging).
pub trait BatchReporter: Send + Sync {
    fn report(&self, event: BatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBatchReporter;

impl BatchReporter for TracingBatchReporter {
    fn report(&self, event: BatchEvent<'_>) {
        match event {
            BatchEvent::Started {
                batch_id,
                total,
                chunks,
            } => {
                tracing::info!(%batch_id, %total, %chunks, "Batch started");
            }
            BatchEvent::ItemCompleted {
                batch_id,
                result,
                cache_hit,
                completed,
                total,
            } => {
                tracing::debug!(
                    %batch_id,
                    identifier = %result.identifier(),
                    success = result.is_success(),
                    %cache_hit,
                    "Completed {completed}/{total}"
                );
            }
            BatchEvent::ChunkCompleted {
                batch_id,
                chunk,
                chunks,
            } => {
                tracing::info!(%batch_id, "Chunk {chunk}/{chunks} complete");
            }
            BatchEvent::Finished { report } => {
                tracing::info!(
                    batch_id = %report.batch_id,
                    total = report.total,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    cache_hits = report.cache_hits,
                    duration_ms = report.duration.as_millis() as u64,
                    throughput = report.throughput(),
                    "Batch finished"
                );
            }
        }
    }
}

/// Reporter that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl BatchReporter for SilentReporter {}

/// Batch progress counters, readable from another task or thread while the
/// batch runs.
#[derive(Debug, Default)]
pub struct BatchProgress {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Completed share in `[0, 1]`; zero before a batch starts.
    pub fn fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.completed() as f64 / total as f64,
        }
    }

    fn start(&self, total: usize) {
        self.completed.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    fn advance(&self) -> usize {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Point-in-time view of one orchestrator, served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub endpoint_name: String,
    pub endpoints: Vec<String>,
    pub cache_entries: u64,
    pub rate_window: usize,
    pub rate_limit: usize,
    pub breaker: CircuitBreakerStats,
}

struct Shared<U> {
    client: U,
    config: OrchestratorConfig,
    limiter: RateLimiter,
    breaker: CircuitBreakerRegistry,
    cache: ProfileCache,
    permits: Semaphore,
}

/// Fetches profiles for many identifiers against one upstream source under
/// a concurrency ceiling, a shared rate window, a circuit breaker and a
/// result cache.
///
/// Cheap to clone; clones share all state.
pub struct BulkFetchOrchestrator<U: UpstreamClient> {
    shared: Arc<Shared<U>>,
}

impl<U: UpstreamClient> Clone for BulkFetchOrchestrator<U> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<U: UpstreamClient> BulkFetchOrchestrator<U> {
    pub fn new(client: U, config: OrchestratorConfig) -> Result<Self, AppError> {
        if config.endpoints.is_empty() {
            return Err(AppError::ConfigError(format!(
                "no endpoints configured for '{}'",
                config.endpoint_name
            )));
        }
        if config.max_concurrent_calls == 0 {
            return Err(AppError::ConfigError(
                "max_concurrent_calls must be at least 1".into(),
            ));
        }
        for warning in config.validate() {
            tracing::warn!(endpoint = %config.endpoint_name, %warning, "Orchestrator configuration");
        }

        let shared = Shared {
            limiter: RateLimiter::new(config.rate_limit_per_second),
            breaker: CircuitBreakerRegistry::new(config.breaker.clone()),
            cache: ProfileCache::new(config.cache_ttl, config.max_cache_size),
            permits: Semaphore::new(config.max_concurrent_calls),
            client,
            config,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    pub fn cache(&self) -> &ProfileCache {
        &self.shared.cache
    }

    pub fn breaker(&self) -> &CircuitBreakerRegistry {
        &self.shared.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.shared.limiter
    }

    /// Start the periodic cache sweep; it stops when `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.shared
            .cache
            .spawn_sweeper(self.shared.config.cache_sweep_interval, cancel)
    }

    pub async fn stats(&self) -> OrchestratorStats {
        let config = &self.shared.config;
        OrchestratorStats {
            endpoint_name: config.endpoint_name.clone(),
            endpoints: config.endpoints.clone(),
            cache_entries: self.shared.cache.len(),
            rate_window: self.shared.limiter.window_len().await,
            rate_limit: self.shared.limiter.limit(),
            breaker: self.shared.breaker.stats(&config.endpoint_name),
        }
    }

    /// Fetch a single identifier through the same path a batch uses.
    ///
    /// Only a malformed identifier is an `Err`; upstream failures come back
    /// as a failed [`FetchResult`].
    pub async fn fetch_one(&self, raw: &str) -> Result<FetchResult, AppError> {
        let identifier = validate_identifier(raw, self.shared.config.max_identifier_len)?;
        let handle = self.spawn_task(identifier.clone(), CancellationToken::new());
        Ok(match handle.await {
            Ok((result, _)) => result,
            Err(e) => task_failed(&identifier, e),
        })
    }

    /// Fetch a batch, returning one result per unique identifier in input order.
    pub async fn fetch_batch<S: AsRef<str>>(&self, raw: &[S]) -> Result<Vec<FetchResult>, AppError> {
        let outcome = self
            .fetch_batch_with_progress(
                raw,
                &BatchProgress::new(),
                &TracingBatchReporter,
                CancellationToken::new(),
            )
            .await?;
        Ok(outcome.results)
    }

    /// Fetch a batch with progress reporting and cooperative cancellation.
    ///
    /// Identifiers are trimmed, filtered and deduplicated first; an input
    /// with nothing usable left is `Err(InvalidInput)`. Identifiers not yet
    /// attempted when `cancel` fires come back as `Cancelled` failures.
    pub async fn fetch_batch_with_progress<S, R>(
        &self,
        raw: &[S],
        progress: &BatchProgress,
        reporter: &R,
        cancel: CancellationToken,
    ) -> Result<BatchOutcome, AppError>
    where
        S: AsRef<str>,
        R: BatchReporter,
    {
        let identifiers = sanitize_identifiers(raw, self.shared.config.max_identifier_len)?;
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();

        let total = identifiers.len();
        let chunk_size = self.shared.config.processing_batch_size.max(1);
        let chunks = total.div_ceil(chunk_size);

        progress.start(total);
        reporter.report(BatchEvent::Started {
            batch_id,
            total,
            chunks,
        });

        // Tasks still running when this future is dropped see a cancelled token.
        let batch_cancel = cancel.child_token();
        let _abort_on_drop = batch_cancel.clone().drop_guard();

        let mut pending = FuturesUnordered::new();
        let mut chunk_remaining = Vec::with_capacity(chunks);
        for (chunk_idx, chunk) in identifiers.chunks(chunk_size).enumerate() {
            chunk_remaining.push(chunk.len());
            for (offset, identifier) in chunk.iter().enumerate() {
                let index = chunk_idx * chunk_size + offset;
                let handle = self.spawn_task(identifier.clone(), batch_cancel.clone());
                pending.push(async move { (index, chunk_idx, handle.await) });
            }
        }

        let mut slots: Vec<Option<FetchResult>> = vec![None; total];
        let mut cache_hits = 0;
        while let Some((index, chunk_idx, joined)) = pending.next().await {
            let (result, cache_hit) = match joined {
                Ok(done) => done,
                Err(e) => (task_failed(&identifiers[index], e), false),
            };
            if cache_hit {
                cache_hits += 1;
            }

            let completed = progress.advance();
            reporter.report(BatchEvent::ItemCompleted {
                batch_id,
                result: &result,
                cache_hit,
                completed,
                total,
            });
            slots[index] = Some(result);

            chunk_remaining[chunk_idx] -= 1;
            if chunk_remaining[chunk_idx] == 0 {
                reporter.report(BatchEvent::ChunkCompleted {
                    batch_id,
                    chunk: chunk_idx + 1,
                    chunks,
                });
            }
        }

        let results: Vec<FetchResult> = slots
            .into_iter()
            .zip(&identifiers)
            .map(|(slot, identifier)| {
                slot.unwrap_or_else(|| {
                    FetchResult::failure(identifier, &AppError::Generic("no result recorded".into()))
                })
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let report = BatchReport {
            batch_id,
            total,
            succeeded,
            failed: total - succeeded,
            cache_hits,
            started_at,
            duration: clock.elapsed(),
        };
        reporter.report(BatchEvent::Finished { report: &report });

        Ok(BatchOutcome { results, report })
    }

    fn spawn_task(
        &self,
        identifier: String,
        cancel: CancellationToken,
    ) -> JoinHandle<(FetchResult, bool)> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.process(&identifier, &cancel).await })
    }
}

fn task_failed(identifier: &str, err: JoinError) -> FetchResult {
    tracing::error!(%identifier, error = %err, "Fetch task panicked");
    FetchResult::failure(identifier, &AppError::Generic(format!("fetch task failed: {err}")))
}

impl<U: UpstreamClient> Shared<U> {
    /// Resolve one identifier. The flag reports whether the cache answered.
    async fn process(&self, identifier: &str, cancel: &CancellationToken) -> (FetchResult, bool) {
        if cancel.is_cancelled() {
            return (FetchResult::failure(identifier, &AppError::Cancelled), false);
        }
        if let Some(hit) = self.cache.get(identifier) {
            tracing::debug!(%identifier, "Cache hit");
            return (hit, true);
        }

        let _permit = tokio::select! {
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    let err = AppError::Generic("orchestrator is shut down".into());
                    return (FetchResult::failure(identifier, &err), false);
                }
            },
            () = cancel.cancelled() => {
                return (FetchResult::failure(identifier, &AppError::Cancelled), false);
            }
        };

        let result = match self.fetch_with_retry(identifier, cancel).await {
            Ok(data) => FetchResult::success(identifier, data),
            Err(e) => {
                if e != AppError::Cancelled {
                    tracing::warn!(%identifier, endpoint = %self.config.endpoint_name, error = %e, "Fetch failed");
                }
                FetchResult::failure(identifier, &e)
            }
        };
        self.cache.insert(identifier, &result);
        (result, false)
    }

    /// Try every mirror at each attempt level, backing off between levels.
    async fn fetch_with_retry(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, AppError> {
        let name = &self.config.endpoint_name;
        let policy = &self.config.retry;
        let mut attempt: u32 = 0;
        let mut last_error: Option<AppError> = None;

        'attempts: loop {
            for endpoint in &self.config.endpoints {
                if cancel.is_cancelled() {
                    break 'attempts;
                }
                self.breaker.check(name)?;
                tokio::select! {
                    () = self.limiter.wait_until_allowed() => {}
                    () = cancel.cancelled() => break 'attempts,
                }

                match self.call_once(identifier, endpoint).await {
                    Ok(data) => {
                        self.breaker.record_success(name);
                        return Ok(data);
                    }
                    Err(e) if e.is_definitive() => {
                        self.breaker.record_success(name);
                        return Err(e);
                    }
                    Err(e) => {
                        self.breaker.record_failure(name, &e);
                        tracing::debug!(%identifier, %endpoint, attempt, error = %e, "Upstream attempt failed");
                        if !e.is_retryable() {
                            return Err(e);
                        }
                        last_error = Some(e);
                    }
                }
            }

            let Some(err) = &last_error else { break };
            if !policy.should_retry(err, attempt) {
                break;
            }
            let delay = policy.delay_for_attempt(attempt);
            tracing::debug!(%identifier, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => break,
            }
            attempt += 1;
        }

        Err(last_error.unwrap_or(AppError::Cancelled))
    }

    async fn call_once(
        &self,
        identifier: &str,
        endpoint: &str,
    ) -> Result<serde_json::Value, AppError> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.client.call(identifier, endpoint)).await {
            Ok(response) => response,
            Err(_) => Err(AppError::Timeout(timeout.as_millis() as u64)),
        }
    }
}
