use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure reported by an automation backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

/// Capability boundary to the browser automation engine.
///
/// The server never drives a browser itself; each registered browser tool
/// forwards its validated arguments to `execute` under the tool's name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Run one tool invocation
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, ExecutorError>;

    /// Whether the backend can currently accept calls
    fn is_available(&self) -> bool {
        true
    }
}
