//! Test doubles for exercising the server without a browser.

use crate::core::{Config, ExecutorError, ToolExecutor};
use crate::errors::Result;
use crate::retry::RetryPolicy;
use crate::server::{Server, ServerBuilder};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Outcome = std::result::Result<Value, ExecutorError>;

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Outcome>>,
    fallback: HashMap<String, Outcome>,
    calls: Vec<(String, Map<String, Value>)>,
}

/// Executor answering from per-tool scripts.
///
/// Queued outcomes are consumed first, then the tool's fixed response is
/// repeated. Tools with nothing scripted echo their arguments back.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<Script>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Response returned whenever the queue for `tool` is empty.
    pub fn with_response(self, tool: &str, value: Value) -> Self {
        self.lock().fallback.insert(tool.to_string(), Ok(value));
        self
    }

    pub fn with_error(self, tool: &str, error: ExecutorError) -> Self {
        self.lock().fallback.insert(tool.to_string(), Err(error));
        self
    }

    pub fn with_responses(self, tool: &str, outcomes: Vec<Outcome>) -> Self {
        self.lock()
            .queued
            .entry(tool.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Fail `count` times with `error` before answering normally.
    pub fn with_failures(self, tool: &str, count: usize, error: ExecutorError) -> Self {
        let outcomes = (0..count).map(|_| Err(error.clone())).collect();
        self.with_responses(tool, outcomes)
    }

    /// Every call sleeps this long first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self, tool: &str) -> usize {
        self.lock().calls.iter().filter(|(name, _)| name == tool).count()
    }

    /// Tool names in call order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn last_arguments(&self, tool: &str) -> Option<Map<String, Value>> {
        self.lock()
            .calls
            .iter()
            .rev()
            .find(|(name, _)| name == tool)
            .map(|(_, arguments)| arguments.clone())
    }
}

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<Value, ExecutorError> {
        let outcome = {
            let mut script = self.lock();
            script.calls.push((tool_name.to_string(), arguments.clone()));
            let queued = script
                .queued
                .get_mut(tool_name)
                .and_then(|queue| queue.pop_front());
            match queued {
                Some(outcome) => outcome,
                None => script
                    .fallback
                    .get(tool_name)
                    .cloned()
                    .unwrap_or_else(|| Ok(json!({"tool": tool_name, "arguments": arguments}))),
            }
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

pub struct TestHelper;

impl TestHelper {
    /// Retries without real waiting.
    pub fn fast_retry_policy() -> RetryPolicy {
        RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = Some(5);
        config.retry.jitter = false;
        config.tools.default_timeout_ms = 5_000;
        config
    }

    /// A server with the browser catalog backed by `executor`.
    pub fn server_with(executor: Arc<dyn ToolExecutor>) -> Result<Arc<Server>> {
        ServerBuilder::new(Self::test_config())
            .with_executor(executor)
            .with_browser_tools()
            .build()
    }

    pub fn scripted_server() -> Result<(Arc<Server>, Arc<ScriptedExecutor>)> {
        let executor = Arc::new(ScriptedExecutor::new());
        let server = Self::server_with(Arc::clone(&executor) as Arc<dyn ToolExecutor>)?;
        Ok((server, executor))
    }
}
