use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;

use skillboard_core::error::{AppError, ErrorKind};
use skillboard_core::identifier::identifiers_from_csv;
use skillboard_core::models::FetchResult;
use skillboard_core::orchestrator::{BatchProgress, TracingBatchReporter};
use skillboard_core::traits::UpstreamClient;

use crate::dto::{
    BatchRequest, BatchResponse, CacheClearResponse, ConfigSummary, HealthResponse,
    ProfileQuery, SourceHealth,
};
use crate::error::ApiError;
use crate::state::AppState;

/// Uploaded sheets with tens of thousands of handles stay well under this.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Build the full router with all routes and middleware.
pub fn router<U: UpstreamClient>(state: Arc<AppState<U>>) -> Router {
    let api = Router::new()
        .route("/v1/{source}/profile", get(fetch_profile::<U>))
        .route("/v1/{source}/profiles", post(fetch_profiles::<U>))
        .route("/v1/{source}/profiles/csv", post(fetch_profiles_csv::<U>))
        .route("/v1/{source}/cache/clear", post(clear_cache::<U>))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    Router::new()
        .route("/health", get(health::<U>))
        .merge(api)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// HTTP status for a single-profile answer; the body is the result either way.
fn status_for(result: &FetchResult) -> StatusCode {
    match result.reason() {
        None => StatusCode::OK,
        Some(ErrorKind::InvalidInput) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Some(ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(ErrorKind::ServiceUnavailable) | Some(ErrorKind::Cancelled) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Some(ErrorKind::Transient) => StatusCode::BAD_GATEWAY,
    }
}

pub async fn fetch_profile<U: UpstreamClient>(
    State(state): State<Arc<AppState<U>>>,
    Path(source): Path<String>,
    Query(query): Query<ProfileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.source(&source)?;
    let username = query.username.ok_or_else(|| {
        AppError::InvalidInput("username query parameter is required".to_string())
    })?;

    let result = orchestrator.fetch_one(&username).await?;
    Ok((status_for(&result), axum::Json(result)))
}

pub async fn fetch_profiles<U: UpstreamClient>(
    State(state): State<Arc<AppState<U>>>,
    Path(source): Path<String>,
    body: Result<axum::Json<BatchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.source(&source)?;
    let axum::Json(body) = body?;

    let outcome = orchestrator
        .fetch_batch_with_progress(
            &body.usernames,
            &BatchProgress::new(),
            &TracingBatchReporter,
            CancellationToken::new(),
        )
        .await?;

    Ok(axum::Json(BatchResponse::from(outcome)))
}

pub async fn fetch_profiles_csv<U: UpstreamClient>(
    State(state): State<Arc<AppState<U>>>,
    Path(source): Path<String>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.source(&source)?;
    let raw = identifiers_from_csv(body.as_bytes())?;

    let outcome = orchestrator
        .fetch_batch_with_progress(
            &raw,
            &BatchProgress::new(),
            &TracingBatchReporter,
            CancellationToken::new(),
        )
        .await?;

    Ok(axum::Json(BatchResponse::from(outcome)))
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub async fn clear_cache<U: UpstreamClient>(
    State(state): State<Arc<AppState<U>>>,
    Path(source): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let orchestrator = state.source(&source)?;
    let cleared = orchestrator.cache().clear();
    tracing::info!(source = %orchestrator.config().endpoint_name, cleared, "Cache cleared");

    Ok(axum::Json(CacheClearResponse {
        source: orchestrator.config().endpoint_name.clone(),
        cleared,
    }))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health<U: UpstreamClient>(State(state): State<Arc<AppState<U>>>) -> impl IntoResponse {
    let mut sources = BTreeMap::new();
    for (name, orchestrator) in &state.sources {
        sources.insert(
            name.clone(),
            SourceHealth {
                config: ConfigSummary::from(orchestrator.config()),
                stats: orchestrator.stats().await,
            },
        );
    }

    let response = HealthResponse {
        status: "healthy",
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        sources,
    };

    (StatusCode::OK, axum::Json(response))
}
