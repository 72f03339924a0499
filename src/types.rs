use crate::errors::ErrorInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-invocation context travelling alongside a [`ToolCall`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(flatten)]
    pub context: CallContext,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            context: CallContext::default(),
        }
    }

    /// Builds a call from a JSON object literal; non-object values mean no arguments.
    pub fn from_json(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(name, arguments)
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = Some(session_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.context.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.context.session_id.as_deref()
    }
}

/// Outcome of a dispatched tool call. `success` and `error` are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    pub data: Option<Map<String, Value>>,
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub cached: bool,
}

impl ToolResult {
    pub fn success(data: Option<Map<String, Value>>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            duration_ms: 0,
            cached: false,
        }
    }

    /// Wraps a backend return value; objects are kept, scalars land under `"value"`.
    pub fn from_value(value: Value) -> Self {
        let data = match value {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Some(map)
            }
        };
        Self::success(data)
    }

    pub fn failure(error: ErrorInfo) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            duration_ms: 0,
            cached: false,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Copy of a cached value as returned to a later caller.
    pub fn served_from_cache(&self) -> Self {
        Self {
            cached: true,
            duration_ms: 0,
            ..self.clone()
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    /// One-line summary stored in session action records.
    pub fn summary(&self) -> String {
        match (&self.error, self.cached) {
            (Some(error), _) => format!("error {}", error),
            (None, true) => "ok (cached)".to_string(),
            (None, false) => match &self.data {
                Some(data) if !data.is_empty() => {
                    let keys: Vec<&str> = data.keys().map(String::as_str).take(5).collect();
                    format!("ok [{}]", keys.join(", "))
                }
                _ => "ok".to_string(),
            },
        }
    }
}
