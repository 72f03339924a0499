//! Routes a [`ToolCall`] to its handler and turns whatever happens into a [`ToolResult`].
//!
//! Order of work for one call: lookup, schema validation, session resolution,
//! cache lookup, then execution under retry with a per-attempt timeout. A
//! caller-supplied `timeout_ms` bounds the whole call, retries included. Every
//! call ends in exactly one audit log line.

use crate::cache::{cache_key, ResponseCache};
use crate::errors::{Classify, ErrorCategory, ErrorInfo};
use crate::retry::{RetryPolicy, Retrier};
use crate::session::{ActionRecord, SessionManager};
use crate::tools::base::{ToolContext, ToolHandler};
use crate::tools::registry::{RegisteredTool, ToolRegistry};
use crate::types::{ToolCall, ToolResult};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
    cache: Option<Arc<ResponseCache>>,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, sessions: Arc<SessionManager>) -> Self {
        Self {
            registry,
            sessions,
            cache: None,
            retry: RetryPolicy::default(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    /// Never fails: every outcome, including handler panics, comes back as a `ToolResult`.
    pub async fn dispatch(&self, call: ToolCall) -> ToolResult {
        let start = Instant::now();
        let (result, outcome) = self.dispatch_inner(&call, start).await;
        let result = if result.cached {
            result
        } else {
            result.with_duration_ms(start.elapsed().as_millis() as u64)
        };

        info!(
            tool = %call.name,
            session_id = call.session_id().unwrap_or("-"),
            ok = result.success,
            outcome,
            cached = result.cached,
            duration_ms = result.duration_ms,
            args_preview = %args_preview(&call.arguments),
            "tool call"
        );
        result
    }

    async fn dispatch_inner(&self, call: &ToolCall, start: Instant) -> (ToolResult, &'static str) {
        let Some(tool) = self.registry.get(&call.name) else {
            return (ToolResult::failure(self.unknown_tool(&call.name)), "not_found");
        };

        if let Err(error) = tool.handler.validate(&tool.descriptor, &call.arguments) {
            return (ToolResult::failure(error), "invalid");
        }

        if let Some(session_id) = call.session_id() {
            match self.sessions.get_or_create(session_id).await {
                Ok(true) => debug!(session_id, "session created on first use"),
                Ok(false) => {}
                Err(e) => return (ToolResult::failure(e.error_info()), "session"),
            }
        }

        let key = match &self.cache {
            Some(_) if tool.descriptor.cacheable => Some(cache_key(&call.name, &call.arguments)),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key) {
                let result = hit.served_from_cache();
                self.record_action(call, &result).await;
                return (result, "cache_hit");
            }
        }

        let attempt_timeout = call
            .context
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        let mut policy = self.retry.clone();
        let deadline = call.context.timeout_ms.map(|_| start + attempt_timeout);
        if let Some(deadline) = deadline {
            policy = policy.with_deadline(deadline);
        }
        if !tool.descriptor.effect.is_repeatable() {
            // a timed-out attempt may still have landed
            policy = policy.excluding(ErrorCategory::Timeout);
        }

        let mut context = ToolContext::new(&call.name, attempt_timeout);
        if let Some(session_id) = call.session_id() {
            context = context.with_session(session_id.to_string(), Arc::clone(&self.sessions));
        }
        let arguments = Arc::new(call.arguments.clone());
        let generation = self.cache.as_ref().map(|cache| cache.generation());

        let outcome = Retrier::new(&policy)
            .on_retry(|error, attempt| {
                debug!(tool = %call.name, attempt, category = %error.category, "retrying tool call")
            })
            .run(|| {
                let mut context = context.clone();
                if let Some(deadline) = deadline {
                    context.timeout = context
                        .timeout
                        .min(deadline.saturating_duration_since(Instant::now()));
                }
                invoke_once(tool, Arc::clone(&arguments), context)
            })
            .await;

        // Failed attempts may have moved the page too.
        if tool.descriptor.effect.changes_page() {
            if let Some(cache) = &self.cache {
                cache.clear();
                debug!(tool = %call.name, "page changed, response cache cleared");
            }
        }

        match outcome {
            Ok(value) => {
                let result = ToolResult::from_value(value);
                if let (Some(cache), Some(key), Some(generation)) = (&self.cache, key, generation) {
                    if !cache.put_if_current(key, result.clone(), generation) {
                        debug!(tool = %call.name, "result not cached");
                    }
                }
                self.record_action(call, &result).await;
                (result, "ok")
            }
            Err(error) => {
                let outcome = match error.category {
                    ErrorCategory::Timeout => "timeout",
                    _ => "error",
                };
                (ToolResult::failure(error), outcome)
            }
        }
    }

    fn unknown_tool(&self, name: &str) -> ErrorInfo {
        let error = ErrorInfo::not_found(format!("Tool not found: {}", name));
        let similar = self.registry.similar_names(name);
        if similar.is_empty() {
            error.with_leading_suggestion("Call tools/list to see the available tools")
        } else {
            error.with_leading_suggestion(format!("Did you mean: {}?", similar.join(", ")))
        }
    }

    async fn record_action(&self, call: &ToolCall, result: &ToolResult) {
        let Some(session_id) = call.session_id() else {
            return;
        };
        let record = ActionRecord::new(&call.name, call.arguments.clone(), result.summary());
        if let Err(e) = self.sessions.add_action(session_id, record).await {
            warn!(session_id, tool = %call.name, "failed to record action: {}", e);
        }
    }
}

/// One attempt in its own task, so a panic or a hung handler stays contained.
async fn invoke_once(
    tool: &RegisteredTool,
    arguments: Arc<Map<String, Value>>,
    context: ToolContext,
) -> Result<Value, ErrorInfo> {
    let handler: Arc<dyn ToolHandler> = Arc::clone(&tool.handler);
    let limit = context.timeout;
    let tool_name = context.tool_name.clone();
    if limit.is_zero() {
        return Err(ErrorInfo::timeout(format!(
            "Tool '{}' ran out of its time budget",
            tool_name
        )));
    }
    let mut task = tokio::spawn(async move { handler.execute(&arguments, &context).await });

    match timeout(limit, &mut task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(err.error_info()),
        Ok(Err(join_err)) if join_err.is_panic() => {
            warn!(tool = %tool_name, "tool handler panicked");
            Err(ErrorInfo::unknown(format!("Tool '{}' panicked during execution", tool_name)))
        }
        Ok(Err(_)) => Err(ErrorInfo::unknown(format!("Tool '{}' was cancelled", tool_name))),
        Err(_) => {
            task.abort();
            Err(ErrorInfo::timeout(format!(
                "Tool '{}' timed out after {}ms",
                tool_name,
                limit.as_millis()
            )))
        }
    }
}

fn args_preview(arguments: &Map<String, Value>) -> String {
    let s = Value::Object(arguments.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutorError;
    use crate::testing::ScriptedExecutor;
    use crate::tools::base::{ToolDescriptor, ToolEffect};
    use crate::tools::catalog::register_browser_tools;
    use crate::tools::schema::{Field, InputSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with `error` for the first `failures` calls, then echoes its arguments.
    struct Flaky {
        failures: u32,
        error: ExecutorError,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ToolHandler for Flaky {
        async fn execute(
            &self,
            arguments: &Map<String, Value>,
            _context: &ToolContext,
        ) -> Result<Value, ExecutorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(Value::Object(arguments.clone()))
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolHandler for Panics {
        async fn execute(
            &self,
            _arguments: &Map<String, Value>,
            _context: &ToolContext,
        ) -> Result<Value, ExecutorError> {
            panic!("handler blew up");
        }
    }

    struct Sleeps(Duration);

    #[async_trait]
    impl ToolHandler for Sleeps {
        async fn execute(
            &self,
            _arguments: &Map<String, Value>,
            _context: &ToolContext,
        ) -> Result<Value, ExecutorError> {
            tokio::time::sleep(self.0).await;
            Ok(json!({"slept": true}))
        }
    }

    /// First call fails after 900ms, later calls hang.
    struct SlowThenStuck {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ToolHandler for SlowThenStuck {
        async fn execute(
            &self,
            _arguments: &Map<String, Value>,
            _context: &ToolContext,
        ) -> Result<Value, ExecutorError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(900)).await;
                Err(ExecutorError::Unavailable("connection reset".to_string()))
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!({}))
            }
        }
    }

    fn flaky(failures: u32, calls: &Arc<AtomicU32>) -> Flaky {
        Flaky {
            failures,
            error: ExecutorError::Timeout("page load".to_string()),
            calls: Arc::clone(calls),
        }
    }

    fn dispatcher(registry: ToolRegistry) -> Dispatcher {
        Dispatcher::new(Arc::new(registry), Arc::new(SessionManager::new()))
            .with_cache(Arc::new(ResponseCache::new(16)))
            .with_retry_policy(
                RetryPolicy::new(3)
                    .with_base_delay(Duration::from_millis(10))
                    .with_jitter(false),
            )
    }

    fn extract_schema() -> InputSchema {
        InputSchema::object().field(Field::string("selector", "CSS selector").required())
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let mut registry = ToolRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register_handler(
                ToolDescriptor::new("take_screenshot", "capture", InputSchema::object()),
                flaky(0, &calls),
            )
            .unwrap();
        let result = dispatcher(registry)
            .dispatch(ToolCall::new("page_screenshot", Map::new()))
            .await;

        let error = result.error.unwrap();
        assert_eq!(error.category, ErrorCategory::NotFound);
        assert!(error.suggestions[0].contains("take_screenshot"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_handler() {
        let mut registry = ToolRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register_handler(
                ToolDescriptor::new("get_element_text", "read text", extract_schema()),
                flaky(0, &calls),
            )
            .unwrap();
        let result = dispatcher(registry)
            .dispatch(ToolCall::from_json("get_element_text", json!({"selector": 7})))
            .await;

        let error = result.error.unwrap();
        assert_eq!(error.category, ErrorCategory::InvalidInput);
        assert!(error.message.contains("selector"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let mut registry = ToolRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register_handler(
                ToolDescriptor::new("select_option", "select", extract_schema())
                    .with_effect(ToolEffect::Idempotent),
                flaky(2, &calls),
            )
            .unwrap();
        let result = dispatcher(registry)
            .dispatch(ToolCall::from_json("select_option", json!({"selector": "#size"})))
            .await;

        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_changing_timeout_is_not_repeated() {
        let mut registry = ToolRegistry::new();
        let clicks = Arc::new(AtomicU32::new(0));
        let typed = Arc::new(AtomicU32::new(0));
        registry
            .register_handler(
                ToolDescriptor::new("click", "click", extract_schema()),
                flaky(2, &clicks),
            )
            .unwrap();
        registry
            .register_handler(
                ToolDescriptor::new("type_text", "type", extract_schema()),
                Flaky {
                    failures: 1,
                    error: ExecutorError::Unavailable("connection reset".to_string()),
                    calls: Arc::clone(&typed),
                },
            )
            .unwrap();
        let dispatcher = dispatcher(registry);

        let click = dispatcher
            .dispatch(ToolCall::from_json("click", json!({"selector": "#buy"})))
            .await;
        assert_eq!(click.error.unwrap().category, ErrorCategory::Timeout);
        assert_eq!(clicks.load(Ordering::SeqCst), 1);

        // the attempt never reached the page, so it is safe to repeat
        let typing = dispatcher
            .dispatch(ToolCall::from_json("type_text", json!({"selector": "#q"})))
            .await;
        assert!(typing.success);
        assert_eq!(typed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_timeout_bounds_all_attempts() {
        let mut registry = ToolRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register_handler(
                ToolDescriptor::new("submit", "submit", InputSchema::object()),
                SlowThenStuck {
                    calls: Arc::clone(&calls),
                },
            )
            .unwrap();
        let dispatcher = dispatcher(registry);

        let start = Instant::now();
        let result = dispatcher
            .dispatch(ToolCall::new("submit", Map::new()).with_timeout_ms(1000))
            .await;
        let elapsed = start.elapsed();

        assert_eq!(result.error.unwrap().category, ErrorCategory::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // slack for timer granularity only
        assert!(elapsed < Duration::from_millis(1005), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_failure() {
        let mut registry = ToolRegistry::new();
        registry
            .register_handler(
                ToolDescriptor::new("boom", "panics", InputSchema::object()),
                Panics,
            )
            .unwrap();
        let result = dispatcher(registry).dispatch(ToolCall::new("boom", Map::new())).await;

        let error = result.error.unwrap();
        assert_eq!(error.category, ErrorCategory::Unknown);
        assert!(!error.suggestions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let mut registry = ToolRegistry::new();
        registry
            .register_handler(
                ToolDescriptor::new("wait", "sleeps", InputSchema::object()),
                Sleeps(Duration::from_secs(60)),
            )
            .unwrap();
        let result = dispatcher(registry)
            .dispatch(ToolCall::new("wait", Map::new()).with_timeout_ms(500))
            .await;

        assert_eq!(result.error.unwrap().category, ErrorCategory::Timeout);
    }

    #[tokio::test]
    async fn test_cacheable_results_are_reused_and_recorded() {
        let mut registry = ToolRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register_handler(
                ToolDescriptor::new("extract_links", "links", extract_schema()).cacheable(),
                flaky(0, &calls),
            )
            .unwrap();
        let dispatcher = dispatcher(registry);

        let first = dispatcher
            .dispatch(ToolCall::from_json("extract_links", json!({"selector": "a"})).in_session("s1"))
            .await;
        let second = dispatcher
            .dispatch(ToolCall::from_json("extract_links", json!({"selector": " a "})).in_session("s1"))
            .await;

        assert!(first.success && !first.cached);
        assert!(second.success && second.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let snapshot = dispatcher.sessions().get_session("s1").await.unwrap();
        assert_eq!(snapshot.actions.len(), 2);
        assert_eq!(snapshot.actions[1].result_summary, "ok (cached)");
    }

    #[tokio::test]
    async fn test_navigation_invalidates_cached_reads() {
        let executor = Arc::new(ScriptedExecutor::new().with_responses(
            "get_page_content",
            vec![Ok(json!({"text": "PAGE A"})), Ok(json!({"text": "PAGE B"}))],
        ));
        let mut registry = ToolRegistry::new();
        register_browser_tools(&mut registry, executor.clone()).unwrap();
        let dispatcher = dispatcher(registry);
        let navigate = |url: &str| ToolCall::from_json("navigate", json!({ "url": url }));
        let read = || ToolCall::new("get_page_content", Map::new());

        assert!(dispatcher.dispatch(navigate("https://a.test/")).await.success);
        let first = dispatcher.dispatch(read()).await;
        let repeated = dispatcher.dispatch(read()).await;
        assert_eq!(first.data.unwrap()["text"], "PAGE A");
        assert!(repeated.cached);

        assert!(dispatcher.dispatch(navigate("https://b.test/")).await.success);
        let after = dispatcher.dispatch(read()).await;
        assert!(!after.cached);
        assert_eq!(after.data.unwrap()["text"], "PAGE B");
        assert_eq!(executor.call_count("get_page_content"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached_or_recorded() {
        let mut registry = ToolRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register_handler(
                ToolDescriptor::new("get_page_content", "content", InputSchema::object())
                    .cacheable(),
                Flaky {
                    failures: 1,
                    error: ExecutorError::NotFound("no page loaded".to_string()),
                    calls: Arc::clone(&calls),
                },
            )
            .unwrap();
        let dispatcher = dispatcher(registry);

        let call = ToolCall::new("get_page_content", Map::new()).in_session("s1");
        let first = dispatcher.dispatch(call.clone()).await;
        assert_eq!(first.error.unwrap().category, ErrorCategory::NotFound);
        assert_eq!(dispatcher.cache().unwrap().len(), 0);

        let second = dispatcher.dispatch(call).await;
        assert!(second.success && !second.cached);
        let snapshot = dispatcher.sessions().get_session("s1").await.unwrap();
        assert_eq!(snapshot.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let mut registry = ToolRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        registry
            .register_handler(
                ToolDescriptor::new("refresh", "reload", InputSchema::object()),
                flaky(0, &calls),
            )
            .unwrap();
        let dispatcher = dispatcher(registry);
        dispatcher.sessions().create_session(Some("done".to_string())).await.unwrap();
        dispatcher.sessions().close_session("done").await.unwrap();

        let result = dispatcher
            .dispatch(ToolCall::new("refresh", Map::new()).in_session("done"))
            .await;
        assert_eq!(result.error.unwrap().category, ErrorCategory::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
