//! JSON-RPC 2.0 envelopes as seen from the server side.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const NOT_INITIALIZED: i64 = -32002;
pub const SERVER_CLOSED: i64 = -32003;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// Incoming request. A missing `id` makes it a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<RequestId>,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Transport-level failure, distinct from a tool's `ErrorInfo`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("JSON-RPC error {code}: {message}")]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {}", detail))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn not_initialized(method: &str) -> Self {
        Self::new(
            NOT_INITIALIZED,
            format!("Server not initialized; call initialize before {}", method),
        )
    }

    pub fn closed() -> Self {
        Self::new(SERVER_CLOSED, "Server has been shut down")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    /// `null` when the request id could not be determined
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl Response {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: ProtocolError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Envelope checks; on failure returns the id (when it could be read) with the error.
pub fn parse_request(text: &str) -> Result<Request, (Option<RequestId>, ProtocolError)> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| (None, ProtocolError::parse_error(e)))?;
    parse_request_value(value)
}

pub fn parse_request_value(value: Value) -> Result<Request, (Option<RequestId>, ProtocolError)> {
    let Value::Object(mut envelope) = value else {
        return Err((
            None,
            ProtocolError::invalid_request("Request must be a JSON object"),
        ));
    };

    let id = match envelope.remove("id") {
        None => None,
        Some(raw) => match serde_json::from_value::<RequestId>(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                return Err((
                    None,
                    ProtocolError::invalid_request("id must be a string or an integer"),
                ))
            }
        },
    };

    if envelope.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err((id, ProtocolError::invalid_request("jsonrpc must be \"2.0\"")));
    }

    let method = match envelope.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        _ => return Err((id, ProtocolError::invalid_request("method must be a non-empty string"))),
    };

    let params = match envelope.remove("params") {
        None | Some(Value::Null) => None,
        Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
        Some(_) => {
            return Err((id, ProtocolError::invalid_request("params must be an object or array")))
        }
    };

    Ok(Request { id, method, params })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_request_and_notification() {
        let request =
            parse_request(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert_eq!(request.id, Some(RequestId::Number(1)));
        assert!(!request.is_notification());

        let note = parse_request(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert!(note.is_notification());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let (id, err) = parse_request("{not json").unwrap_err();
        assert_eq!(id, None);
        assert_eq!(err.code, PARSE_ERROR);
    }

    #[test]
    fn test_envelope_violations_are_invalid_requests() {
        let cases = [
            json!([1, 2]),
            json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 2}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "ping", "params": 5}),
            json!({"jsonrpc": "2.0", "id": {"x": 1}, "method": "ping"}),
        ];
        for case in cases {
            let (_, err) = parse_request_value(case.clone()).unwrap_err();
            assert_eq!(err.code, INVALID_REQUEST, "case: {}", case);
        }
    }

    #[test]
    fn test_error_response_keeps_id() {
        let (id, err) =
            parse_request(r#"{"jsonrpc":"1.0","id":"abc","method":"ping"}"#).unwrap_err();
        let response = Response::error(id, err);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], "abc");
        assert_eq!(value["error"]["code"], INVALID_REQUEST);
        assert!(value.get("result").is_none());
    }
}
