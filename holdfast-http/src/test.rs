use crate::{router, AppState};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use holdfast_base::Strategy;
use holdfast_repl::ReplicationManager;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tower::ServiceExt;

const TOKEN: &str = "testing-token";

fn app(n: usize, strategy: Strategy, rf: Option<usize>) -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let manager = ReplicationManager::new(n, 5000, strategy, rf, dir.path()).unwrap();
    let state = Arc::new(AppState {
        manager: RwLock::new(manager),
        api_token: TOKEN.to_string(),
    });
    (dir, router(state))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    let request = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[test_log::test(tokio::test)]
async fn test_write_then_read() {
    let (_dir, app) = app(3, Strategy::Full, None);
    let (status, body) = call(
        &app,
        "POST",
        "/write",
        Some(json!({"key": "k1", "value": "v1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, body) = call(&app, "GET", "/read/k1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "k1");
    assert_eq!(body["value"], "v1");
    assert_eq!(body["message"], "Read from replica 0");
    assert_eq!(body["status"], "success");
}

#[test_log::test(tokio::test)]
async fn test_duplicate_write_conflicts() {
    let (_dir, app) = app(3, Strategy::Full, None);
    call(&app, "POST", "/write", Some(json!({"key": "k1", "value": "v1"}))).await;
    let (status, body) = call(
        &app,
        "POST",
        "/write",
        Some(json!({"key": "k1", "value": "v2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Key already exists");
    assert_eq!(body["message"], "The key k1 already exists");
}

#[test_log::test(tokio::test)]
async fn test_write_validation() {
    let (_dir, app) = app(3, Strategy::Full, None);
    for bad in [
        json!({"key": "k1"}),
        json!({"value": "v1"}),
        json!({"key": "  ", "value": "v1"}),
    ] {
        let (status, body) = call(&app, "POST", "/write", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid input");
    }
}

#[test_log::test(tokio::test)]
async fn test_fail_shifts_reads_and_recover_restores() {
    let (_dir, app) = app(3, Strategy::Full, None);
    call(&app, "POST", "/write", Some(json!({"key": "k1", "value": "v1"}))).await;

    let (status, body) = call(&app, "POST", "/fail/0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Node 0 failed");

    let (_, body) = call(&app, "GET", "/read/k1", None).await;
    assert_eq!(body["message"], "Read from replica 1");

    let (status, body) = call(&app, "POST", "/recover/0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Node 0 recovered");

    let (_, body) = call(&app, "GET", "/read/k1", None).await;
    assert_eq!(body["message"], "Read from replica 0");
    assert_eq!(body["value"], "v1");
}

#[test_log::test(tokio::test)]
async fn test_read_after_all_nodes_fail() {
    let (_dir, app) = app(3, Strategy::Full, None);
    call(&app, "POST", "/write", Some(json!({"key": "k2", "value": "v2"}))).await;
    for i in 0..3 {
        call(&app, "POST", &format!("/fail/{i}"), None).await;
    }
    let (status, body) = call(&app, "GET", "/read/k2", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Key not found");
    assert_eq!(body["message"], "All replicas failed or key not found");
}

#[test_log::test(tokio::test)]
async fn test_delete() {
    let (_dir, app) = app(3, Strategy::Full, None);
    call(&app, "POST", "/write", Some(json!({"key": "k1", "value": "v1"}))).await;
    let (status, body) = call(&app, "DELETE", "/delete/k1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Key k1 deleted successfully");

    let (status, _) = call(&app, "DELETE", "/delete/k1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", "/read/k1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_nodes_report() {
    let (_dir, app) = app(2, Strategy::Full, None);
    call(&app, "POST", "/fail/1", None).await;
    let (status, body) = call(&app, "GET", "/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["nodes"],
        json!([
            {"node_id": 0, "status": "alive", "port": 5000},
            {"node_id": 1, "status": "dead", "port": 5001},
        ])
    );
}

#[test_log::test(tokio::test)]
async fn test_fail_unknown_node_is_an_internal_error() {
    let (_dir, app) = app(3, Strategy::Full, None);
    let (status, body) = call(&app, "POST", "/fail/99", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
}

#[test_log::test(tokio::test)]
async fn test_set_replication_strategy() {
    let (_dir, app) = app(3, Strategy::Full, None);

    let (status, body) = call(&app, "POST", "/set_replication_strategy", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Replication strategy is required");

    let (status, body) = call(
        &app,
        "POST",
        "/set_replication_strategy",
        Some(json!({"strategy": "quorum"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid strategy");

    let (status, body) = call(
        &app,
        "POST",
        "/set_replication_strategy",
        Some(json!({"strategy": "consistent", "replication_factor": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "Replication strategy set to consistent with factor 2"
    );
}

#[test_log::test(tokio::test)]
async fn test_nodes_for_key() {
    let (_dir, ring_app) = app(3, Strategy::Consistent, Some(2));
    let (status, body) = call(&ring_app, "GET", "/nodes_for_key/k1", None).await;
    assert_eq!(status, StatusCode::OK);
    let nodes = body["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_ne!(nodes[0], nodes[1]);
    // Deterministic across calls.
    let (_, again) = call(&ring_app, "GET", "/nodes_for_key/k1", None).await;
    assert_eq!(body, again);

    let (_dir2, full_app) = app(3, Strategy::Full, None);
    let (status, body) = call(&full_app, "GET", "/nodes_for_key/k1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Consistent hashing is not enabled");
}

#[test_log::test(tokio::test)]
async fn test_every_route_requires_the_token() {
    let (_dir, app) = app(3, Strategy::Full, None);
    let routes: [(&str, &str, Option<Value>); 8] = [
        ("POST", "/write", Some(json!({"key": "k", "value": "v"}))),
        ("GET", "/read/k", None),
        ("DELETE", "/delete/k", None),
        ("POST", "/fail/0", None),
        ("POST", "/recover/0", None),
        ("GET", "/nodes", None),
        ("POST", "/set_replication_strategy", Some(json!({"strategy": "full"}))),
        ("GET", "/nodes_for_key/k", None),
    ];
    for (method, uri, body) in routes {
        for auth in [None, Some("Bearer wrong-token")] {
            let builder = Request::builder().method(method).uri(uri);
            let builder = match auth {
                Some(h) => builder.header(header::AUTHORIZATION, h),
                None => builder,
            };
            let request = match &body {
                Some(v) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(v.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{method} {uri}");
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(value["error"], "Unauthorized");
        }
    }
}
