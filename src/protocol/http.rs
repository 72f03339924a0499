//! HTTP front end: `POST /rpc`, `GET /health`, `GET /tools`.
//!
//! HTTP has no connection state: every `/rpc` request gets its own handler,
//! already past the handshake, and `shutdown` is refused since there is no
//! connection to close.

use crate::protocol::handler::ProtocolHandler;
use crate::protocol::jsonrpc::{parse_request, ProtocolError, Response};
use crate::server::Server;
use crate::tools::ToolDescriptor;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Clone)]
struct AppState {
    server: Arc<Server>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions_active: usize,
    timestamp: chrono::DateTime<chrono::Utc>,
}

pub fn router(server: Arc<Server>) -> Router {
    let state = AppState { server };
    Router::new()
        .route("/rpc", post(rpc))
        .route("/health", get(health))
        .route("/tools", get(tools))
        .with_state(state)
}

pub async fn serve_http(server: Arc<Server>, bind: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving JSON-RPC over HTTP");
    let shutdown = server.shutdown_token();
    axum::serve(listener, router(server))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn rpc(State(state): State<AppState>, body: String) -> impl IntoResponse {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err((id, error)) => return (StatusCode::OK, Json(json!(Response::error(id, error)))),
    };

    if request.method == "shutdown" {
        debug!("refused shutdown over HTTP");
        let error = ProtocolError::invalid_request("shutdown is not supported over HTTP");
        return (StatusCode::OK, Json(json!(Response::error(request.id, error))));
    }

    let mut handler = ProtocolHandler::ready(Arc::clone(&state.server));
    match handler.handle_request(request).await {
        Some(response) => (StatusCode::OK, Json(json!(response))),
        None => (StatusCode::ACCEPTED, Json(Value::Null)),
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.server.is_shutting_down() {
        "stopping"
    } else {
        "healthy"
    };
    Json(HealthResponse {
        status,
        sessions_active: state.server.sessions().active_count().await,
        timestamp: chrono::Utc::now(),
    })
}

async fn tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.server.registry().list_tools())
}
