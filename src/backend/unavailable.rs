use crate::core::{ExecutorError, ToolExecutor};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Stand-in backend used when no driver is configured; every call fails as `Unavailable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableExecutor;

#[async_trait]
impl ToolExecutor for UnavailableExecutor {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn execute(
        &self,
        tool_name: &str,
        _arguments: &Map<String, Value>,
    ) -> Result<Value, ExecutorError> {
        Err(ExecutorError::Unavailable(format!(
            "no browser driver is configured to run '{}'",
            tool_name
        )))
    }

    fn is_available(&self) -> bool {
        false
    }
}
