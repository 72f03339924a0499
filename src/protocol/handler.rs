//! Per-connection protocol state machine.
//!
//! `Uninitialized --initialize--> Ready --shutdown--> Closed`. Only `ping`
//! works in every state. Tool failures travel inside a successful response as
//! a `ToolResult`; protocol errors are reserved for bad envelopes, bad params
//! and calls made in the wrong state.

use crate::batch::BatchOptions;
use crate::errors::ServerError;
use crate::protocol::jsonrpc::{parse_request, ProtocolError, Request, Response};
use crate::server::Server;
use crate::types::ToolCall;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Uninitialized,
    Ready,
    Closed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchParams {
    calls: Vec<ToolCall>,
    #[serde(flatten)]
    options: BatchOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SessionParams {
    session_id: Option<String>,
}

pub struct ProtocolHandler {
    server: Arc<Server>,
    state: ProtocolState,
}

impl ProtocolHandler {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            state: ProtocolState::Uninitialized,
        }
    }

    /// A handler that skips the handshake, for transports without connection state.
    pub fn ready(server: Arc<Server>) -> Self {
        Self {
            server,
            state: ProtocolState::Ready,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Handles one raw message. Returns `None` for notifications.
    pub async fn handle_message(&mut self, text: &str) -> Option<Response> {
        match parse_request(text) {
            Ok(request) => self.handle_request(request).await,
            Err((id, error)) => {
                warn!(code = error.code, "rejected message: {}", error.message);
                Some(Response::error(id, error))
            }
        }
    }

    pub async fn handle_request(&mut self, request: Request) -> Option<Response> {
        let Request { id, method, params } = request;
        let notification = id.is_none();
        debug!(method = %method, notification, "handling request");

        let outcome = self.route(&method, params).await;
        if notification {
            if let Err(error) = outcome {
                debug!(method = %method, "notification failed: {}", error);
            }
            return None;
        }
        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::error(id, error),
        })
    }

    async fn route(&mut self, method: &str, params: Option<Value>) -> Result<Value, ProtocolError> {
        match method {
            "ping" => return Ok(json!({})),
            "initialize" => return self.initialize(params),
            _ => {}
        }
        match self.state {
            ProtocolState::Uninitialized => return Err(ProtocolError::not_initialized(method)),
            ProtocolState::Closed => return Err(ProtocolError::closed()),
            ProtocolState::Ready => {}
        }

        match method {
            "notifications/initialized" => Ok(Value::Null),
            "shutdown" => {
                self.state = ProtocolState::Closed;
                info!("client requested shutdown");
                Ok(json!({}))
            }
            "tools/list" => {
                let tools = self.server.registry().list_tools();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let call: ToolCall = parse_params(params)?;
                let result = self.server.call_tool(call).await;
                to_value(&result)
            }
            "tools/batch" => {
                let params: BatchParams = parse_params(params)?;
                let outcome = self.server.run_batch(params.calls, params.options).await;
                to_value(&outcome)
            }
            "sessions/create" => {
                let params: SessionParams = parse_optional_params(params)?;
                let snapshot = self
                    .server
                    .sessions()
                    .create_session(params.session_id)
                    .await
                    .map_err(session_error)?;
                to_value(&snapshot)
            }
            "sessions/list" => {
                let sessions = self.server.sessions().list_sessions().await;
                Ok(json!({ "sessions": sessions }))
            }
            "sessions/get" => {
                let session_id = required_session_id(params)?;
                let snapshot = self
                    .server
                    .sessions()
                    .get_session(&session_id)
                    .await
                    .map_err(session_error)?;
                to_value(&snapshot)
            }
            "sessions/close" => {
                let session_id = required_session_id(params)?;
                let snapshot = self
                    .server
                    .sessions()
                    .close_session(&session_id)
                    .await
                    .map_err(session_error)?;
                to_value(&snapshot)
            }
            "cache/stats" => to_value(&self.server.cache().stats()),
            other => Err(ProtocolError::method_not_found(other)),
        }
    }

    fn initialize(&mut self, params: Option<Value>) -> Result<Value, ProtocolError> {
        if self.state == ProtocolState::Closed {
            return Err(ProtocolError::closed());
        }
        if let Some(client) = params.as_ref().and_then(|p| p.get("clientInfo")) {
            let client_name = client
                .get("name")
                .and_then(|name| name.as_str())
                .unwrap_or("unknown");
            info!(client = client_name, "client initialized");
        }
        self.state = ProtocolState::Ready;
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": self.server.info(),
            "capabilities": {
                "tools": { "listChanged": false }
            }
        }))
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ProtocolError> {
    let params = params.ok_or_else(|| ProtocolError::invalid_params("params are required"))?;
    serde_json::from_value(params)
        .map_err(|e| ProtocolError::invalid_params(format!("Invalid params: {}", e)))
}

fn parse_optional_params<T: DeserializeOwned + Default>(
    params: Option<Value>,
) -> Result<T, ProtocolError> {
    match params {
        None => Ok(T::default()),
        Some(params) => parse_params(Some(params)),
    }
}

fn required_session_id(params: Option<Value>) -> Result<String, ProtocolError> {
    let params: SessionParams = parse_optional_params(params)?;
    params
        .session_id
        .ok_or_else(|| ProtocolError::invalid_params("sessionId is required"))
}

fn session_error(error: ServerError) -> ProtocolError {
    ProtocolError::invalid_params(error.to_string())
        .with_data(json!({ "category": error.category() }))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::internal(e.to_string()))
}
