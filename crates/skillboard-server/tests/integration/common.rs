use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use skillboard_core::config::OrchestratorConfig;
use skillboard_core::orchestrator::BulkFetchOrchestrator;
use skillboard_core::retry::RetryPolicy;
use skillboard_core::testutil::MockUpstream;
use skillboard_server::routes;
use skillboard_server::state::AppState;

pub struct TestApp {
    pub router: Router,
    pub upstream: MockUpstream,
}

fn test_config(source: &str) -> OrchestratorConfig {
    OrchestratorConfig::new(source, [format!("https://{source}.mock.test/{{id}}")])
        .with_rate_limit_per_second(1000)
        .with_retry(RetryPolicy::none())
}

/// Router with `codechef` and `github` sources sharing one mock upstream.
pub fn setup_test_app() -> TestApp {
    setup_test_app_with(MockUpstream::new())
}

pub fn setup_test_app_with(upstream: MockUpstream) -> TestApp {
    let state = ["codechef", "github"]
        .into_iter()
        .fold(AppState::new(), |state, source| {
            let orchestrator = BulkFetchOrchestrator::new(upstream.clone(), test_config(source))
                .expect("valid test config");
            state.with_source(source, orchestrator)
        });

    TestApp {
        router: routes::router(Arc::new(state)),
        upstream,
    }
}

/// Send one request and decode the JSON body.
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
