//! Executors that connect the server to a browser automation engine.

pub mod process;
pub mod unavailable;

pub use process::ProcessExecutor;
pub use unavailable::UnavailableExecutor;

use crate::core::ToolExecutor;
use crate::errors::Result;
use std::sync::Arc;

/// A process-backed executor for `command`, or [`UnavailableExecutor`] when it is empty.
pub fn executor_for(command: &[String]) -> Result<Arc<dyn ToolExecutor>> {
    if command.is_empty() {
        tracing::warn!("no driver command configured; browser tools will report Unavailable");
        return Ok(Arc::new(UnavailableExecutor));
    }
    Ok(Arc::new(ProcessExecutor::spawn(command)?))
}
