// The HTTP surface: a thin translation from routes to replication
// manager calls, JSON in and out, every route behind a bearer token.
//
// The manager sits behind one reader-writer lock. Mutating routes
// (write, delete, fail, recover, set_replication_strategy) take the
// write half; read, nodes and nodes_for_key share the read half.
// Each request's manager call runs to completion before the response
// is written, so redistribution and recovery are foreground work
// from the client's point of view.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use holdfast_base::{NodeId, Strategy};
use holdfast_repl::{ReplicationManager, StoreError};

#[cfg(test)]
mod test;

pub struct AppState {
    pub manager: RwLock<ReplicationManager>,
    pub api_token: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/write", post(write))
        .route("/read/:key", get(read))
        .route("/delete/:key", delete(delete_key))
        .route("/fail/:node_id", post(fail))
        .route("/recover/:node_id", post(recover))
        .route("/nodes", get(nodes))
        .route("/set_replication_strategy", post(set_replication_strategy))
        .route("/nodes_for_key/:key", get(nodes_for_key))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn reply(code: StatusCode, body: Value) -> Response {
    (code, Json(body)).into_response()
}

async fn require_api_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let expected = format!("Bearer {}", state.api_token);
    match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(got) if got == expected => next.run(request).await,
        _ => reply(
            StatusCode::FORBIDDEN,
            json!({"error": "Unauthorized", "message": "Invalid API token"}),
        ),
    }
}

fn error_reply(e: StoreError) -> Response {
    match e {
        StoreError::KeyAbsent => reply(
            StatusCode::NOT_FOUND,
            json!({"error": "Key not found", "message": "Key does not exist"}),
        ),
        StoreError::KeyConflict(key) => reply(
            StatusCode::CONFLICT,
            json!({"error": "Key already exists",
                   "message": format!("The key {key} already exists")}),
        ),
        StoreError::InvalidStrategy(s) => reply(
            StatusCode::BAD_REQUEST,
            json!({"error": "Invalid strategy",
                   "message": format!("unknown replication strategy: {s}")}),
        ),
        // Node-id and storage failures both surface as 500s; the
        // distinction matters to operators, not clients.
        other => reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "Internal server error", "message": other.to_string()}),
        ),
    }
}

#[derive(Deserialize)]
struct WriteBody {
    key: Option<String>,
    value: Option<String>,
}

async fn write(State(state): State<Arc<AppState>>, Json(body): Json<WriteBody>) -> Response {
    let (key, value) = match (body.key, body.value) {
        (Some(k), Some(v)) if !k.trim().is_empty() && !v.is_empty() => (k, v),
        _ => {
            return reply(
                StatusCode::BAD_REQUEST,
                json!({"error": "Invalid input", "message": "Key and value are required"}),
            )
        }
    };
    let mut manager = state.manager.write().await;
    match manager.write_to_replicas(&key, &value) {
        Ok(()) => reply(
            StatusCode::OK,
            json!({"status": "success",
                   "message": format!("Key {key} written successfully")}),
        ),
        Err(e) => error_reply(e),
    }
}

async fn read(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    let manager = state.manager.read().await;
    match manager.read_from_replicas(&key) {
        Ok(Some(hit)) => reply(
            StatusCode::OK,
            json!({"key": key, "value": hit.value,
                   "message": format!("Read from replica {}", hit.node),
                   "status": "success"}),
        ),
        Ok(None) => reply(
            StatusCode::NOT_FOUND,
            json!({"error": "Key not found",
                   "message": "All replicas failed or key not found"}),
        ),
        Err(e) => error_reply(e),
    }
}

async fn delete_key(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    let mut manager = state.manager.write().await;
    match manager.delete_from_replicas(&key) {
        Ok(()) => reply(
            StatusCode::OK,
            json!({"status": "success",
                   "message": format!("Key {key} deleted successfully")}),
        ),
        Err(e) => error_reply(e),
    }
}

async fn fail(State(state): State<Arc<AppState>>, Path(node_id): Path<i64>) -> Response {
    let mut manager = state.manager.write().await;
    match manager.fail_node(NodeId(node_id)) {
        Ok(()) => reply(
            StatusCode::OK,
            json!({"status": "success", "message": format!("Node {node_id} failed")}),
        ),
        Err(e) => error_reply(e),
    }
}

async fn recover(State(state): State<Arc<AppState>>, Path(node_id): Path<i64>) -> Response {
    let mut manager = state.manager.write().await;
    match manager.recover_node(NodeId(node_id)) {
        Ok(()) => reply(
            StatusCode::OK,
            json!({"status": "success", "message": format!("Node {node_id} recovered")}),
        ),
        Err(e) => error_reply(e),
    }
}

async fn nodes(State(state): State<Arc<AppState>>) -> Response {
    let manager = state.manager.read().await;
    reply(
        StatusCode::OK,
        json!({"status": "success", "nodes": manager.nodes_status()}),
    )
}

#[derive(Deserialize)]
struct StrategyBody {
    strategy: Option<String>,
    replication_factor: Option<usize>,
}

async fn set_replication_strategy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StrategyBody>,
) -> Response {
    let Some(name) = body.strategy else {
        return reply(
            StatusCode::BAD_REQUEST,
            json!({"error": "Invalid input", "message": "Replication strategy is required"}),
        );
    };
    let Ok(strategy) = name.parse::<Strategy>() else {
        return error_reply(StoreError::InvalidStrategy(name));
    };
    let mut manager = state.manager.write().await;
    manager.set_replication_strategy(strategy, body.replication_factor);
    let message = match body.replication_factor {
        Some(factor) => {
            format!("Replication strategy set to {strategy} with factor {factor}")
        }
        None => format!("Replication strategy set to {strategy}"),
    };
    reply(StatusCode::OK, json!({"status": "success", "message": message}))
}

async fn nodes_for_key(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    let manager = state.manager.read().await;
    match manager.nodes_for_key(&key) {
        Some(nodes) => reply(
            StatusCode::OK,
            json!({"status": "success", "nodes": nodes}),
        ),
        None => reply(
            StatusCode::BAD_REQUEST,
            json!({"error": "Invalid strategy",
                   "message": "Consistent hashing is not enabled"}),
        ),
    }
}
