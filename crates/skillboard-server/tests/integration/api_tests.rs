use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use skillboard_core::error::AppError;
use skillboard_core::testutil::MockUpstream;

use crate::common::{get, post_json, send, setup_test_app, setup_test_app_with};

#[tokio::test]
async fn health_lists_every_source() {
    let app = setup_test_app();

    let (status, json) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["sources"]["codechef"]["config"]["max_concurrent_calls"], 150);
    assert_eq!(json["sources"]["codechef"]["stats"]["endpoint_name"], "codechef");
    assert_eq!(json["sources"]["github"]["stats"]["breaker"]["state"], "closed");
}

#[tokio::test]
async fn single_profile_returns_upstream_payload() {
    let app = setup_test_app();

    let (status, json) = send(&app.router, get("/v1/codechef/profile?username=alice")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert_eq!(json["identifier"], "alice");
    assert_eq!(json["data"]["handle"], "alice");
}

#[tokio::test]
async fn source_name_is_case_insensitive() {
    let app = setup_test_app();

    let (status, _) = send(&app.router, get("/v1/CodeChef/profile?username=alice")).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn single_profile_not_found_returns_404_with_result_body() {
    let app = setup_test_app_with(
        MockUpstream::new().always_failing("ghost", AppError::NotFound("ghost".into())),
    );

    let (status, json) = send(&app.router, get("/v1/github/profile?username=ghost")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "error");
    assert_eq!(json["reason"], "not_found");
}

#[tokio::test]
async fn missing_username_returns_400() {
    let app = setup_test_app();

    let (status, json) = send(&app.router, get("/v1/codechef/profile")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_input");
}

#[tokio::test]
async fn placeholder_username_returns_400() {
    let app = setup_test_app();

    let (status, json) = send(&app.router, get("/v1/codechef/profile?username=nan")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_input");
    assert_eq!(app.upstream.call_count(), 0);
}

#[tokio::test]
async fn unknown_source_returns_404() {
    let app = setup_test_app();

    let (status, json) = send(&app.router, get("/v1/topcoder/profile?username=alice")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn batch_deduplicates_and_preserves_order() {
    let app = setup_test_app();

    let (status, json) = send(
        &app.router,
        post_json(
            "/v1/codechef/profiles",
            json!({"usernames": ["alice", " Alice ", "bob", "nan", "", "bob"]}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 3);
    assert_eq!(json["succeeded"], 3);
    assert_eq!(json["failed"], 0);
    assert!(json["batch_id"].is_string());
    assert!(json["duration_ms"].is_u64());

    let ids: Vec<&str> = json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["identifier"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["alice", "Alice", "bob"]);
}

#[tokio::test]
async fn batch_isolates_failures() {
    let app = setup_test_app_with(
        MockUpstream::new().always_failing("ghost", AppError::NotFound("ghost".into())),
    );

    let (status, json) = send(
        &app.router,
        post_json("/v1/codechef/profiles", json!({"usernames": ["a", "ghost", "b"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["succeeded"], 2);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["results"][1]["status"], "error");
    assert_eq!(json["results"][1]["reason"], "not_found");
}

#[tokio::test]
async fn repeated_batch_is_served_from_cache() {
    let app = setup_test_app();
    let request = || post_json("/v1/codechef/profiles", json!({"usernames": ["a", "b"]}));

    send(&app.router, request()).await;
    let (_, json) = send(&app.router, request()).await;

    assert_eq!(json["cache_hits"], 2);
    assert_eq!(app.upstream.call_count(), 2);
}

#[tokio::test]
async fn clearing_cache_forces_fresh_upstream_call() {
    let app = setup_test_app();

    send(&app.router, get("/v1/codechef/profile?username=alice")).await;
    send(&app.router, get("/v1/codechef/profile?username=alice")).await;
    assert_eq!(app.upstream.calls_for("alice"), 1);

    let (status, json) = send(&app.router, post_json("/v1/codechef/cache/clear", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["source"], "codechef");
    assert_eq!(json["cleared"], 1);

    let (status, _) = send(&app.router, get("/v1/codechef/profile?username=alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.upstream.calls_for("alice"), 2);
}

#[tokio::test]
async fn clearing_one_source_keeps_the_other_cached() {
    let app = setup_test_app();

    send(&app.router, get("/v1/codechef/profile?username=alice")).await;
    send(&app.router, get("/v1/github/profile?username=alice")).await;
    send(&app.router, post_json("/v1/codechef/cache/clear", json!({}))).await;

    let (_, health) = send(&app.router, get("/health")).await;
    assert_eq!(health["sources"]["codechef"]["stats"]["cache_entries"], 0);
    assert_eq!(health["sources"]["github"]["stats"]["cache_entries"], 1);
}

#[tokio::test]
async fn clearing_unknown_source_returns_404() {
    let app = setup_test_app();

    let (status, json) = send(&app.router, post_json("/v1/topcoder/cache/clear", json!({}))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn empty_batch_returns_400() {
    let app = setup_test_app();

    let (status, json) = send(
        &app.router,
        post_json("/v1/codechef/profiles", json!({"usernames": ["", "null"]})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_input");
}

#[tokio::test]
async fn malformed_body_returns_400() {
    let app = setup_test_app();

    let (status, json) = send(
        &app.router,
        post_json("/v1/codechef/profiles", json!({"handles": ["alice"]})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_input");
}

#[tokio::test]
async fn csv_upload_reads_first_column() {
    let app = setup_test_app();
    let request = Request::post("/v1/github/profiles/csv")
        .header("content-type", "text/csv")
        .body(Body::from("username,college\nalice,NIT\nbob,IIT\nalice,NIT\n"))
        .unwrap();

    let (status, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["results"][0]["identifier"], "alice");
    assert_eq!(json["results"][1]["identifier"], "bob");
}
