//! Test utilities: a scriptable upstream and a recording reporter.
//!
//! Handwritten mocks for dependency injection in unit and integration tests.
//! Both use `Arc<Mutex<_>>` for interior mutability so tests can inspect
//! recorded calls after the fact.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;
use crate::orchestrator::{BatchEvent, BatchReporter};
use crate::traits::UpstreamClient;

// ---------------------------------------------------------------------------
// MockUpstream
// ---------------------------------------------------------------------------

/// One recorded upstream call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub identifier: String,
    pub endpoint: String,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    /// Per-identifier queue of responses; each call pops the front.
    scripted: HashMap<String, VecDeque<Result<serde_json::Value, AppError>>>,
    /// Per-identifier error returned on every call.
    persistent: HashMap<String, AppError>,
    /// Error returned for every identifier, overriding everything else.
    fail_all: Option<AppError>,
    panics: HashSet<String>,
    delay: Option<Duration>,
    calls: Vec<MockCall>,
}

/// Upstream that answers `{"handle": <id>}` unless told otherwise.
#[derive(Clone, Default)]
pub struct MockUpstream {
    state: Arc<Mutex<MockState>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for `identifier`; once drained, the default answer resumes.
    pub fn with_script(
        self,
        identifier: &str,
        responses: Vec<Result<serde_json::Value, AppError>>,
    ) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripted
            .insert(identifier.to_string(), responses.into());
        self
    }

    /// Fail every call for `identifier` with `error`.
    pub fn always_failing(self, identifier: &str, error: AppError) -> Self {
        self.state
            .lock()
            .unwrap()
            .persistent
            .insert(identifier.to_string(), error);
        self
    }

    /// Panic inside the call for `identifier`.
    pub fn panicking_on(self, identifier: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .panics
            .insert(identifier.to_string());
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().delay = Some(delay);
        self
    }

    /// Fail every call with `error` from now on, or stop doing so with `None`.
    pub fn set_fail_all(&self, error: Option<AppError>) {
        self.state.lock().unwrap().fail_all = error;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn calls_for(&self, identifier: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.identifier == identifier)
            .count()
    }
}

impl UpstreamClient for MockUpstream {
    async fn call(&self, identifier: &str, endpoint: &str) -> Result<serde_json::Value, AppError> {
        let (response, delay, panic) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(MockCall {
                identifier: identifier.to_string(),
                endpoint: endpoint.to_string(),
                at: Instant::now(),
            });

            let response = if let Some(err) = &state.fail_all {
                Err(err.clone())
            } else if let Some(err) = state.persistent.get(identifier) {
                Err(err.clone())
            } else if let Some(next) = state
                .scripted
                .get_mut(identifier)
                .and_then(VecDeque::pop_front)
            {
                next
            } else {
                Ok(serde_json::json!({ "handle": identifier }))
            };
            (response, state.delay, state.panics.contains(identifier))
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panic {
            panic!("mock upstream panicked on '{identifier}'");
        }
        response
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Owned copy of a [`BatchEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    Started { total: usize, chunks: usize },
    ItemCompleted { identifier: String, completed: usize, total: usize },
    ChunkCompleted { chunk: usize, chunks: usize },
    Finished { succeeded: usize, failed: usize, cache_hits: usize },
}

/// Reporter that keeps every event for later assertions.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl BatchReporter for RecordingReporter {
    fn report(&self, event: BatchEvent<'_>) {
        let recorded = match event {
            BatchEvent::Started { total, chunks, .. } => RecordedEvent::Started { total, chunks },
            BatchEvent::ItemCompleted {
                result,
                completed,
                total,
                ..
            } => RecordedEvent::ItemCompleted {
                identifier: result.identifier().to_string(),
                completed,
                total,
            },
            BatchEvent::ChunkCompleted { chunk, chunks, .. } => {
                RecordedEvent::ChunkCompleted { chunk, chunks }
            }
            BatchEvent::Finished { report } => RecordedEvent::Finished {
                succeeded: report.succeeded,
                failed: report.failed,
                cache_hits: report.cache_hits,
            },
        };
        self.events.lock().unwrap().push(recorded);
    }
}
