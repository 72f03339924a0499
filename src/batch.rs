//! Runs several tool calls as one request.
//!
//! Results always line up with the input: `results[i]` answers `calls[i]`.
//! In parallel mode calls that share a session id form a lane and run one
//! after another in input order, while lanes run concurrently under a shared
//! concurrency ceiling.

use crate::errors::ErrorInfo;
use crate::tools::Dispatcher;
use crate::types::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchOptions {
    pub parallel: bool,
    /// Sequential mode only: stop at the first failing call
    pub stop_on_error: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            stop_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub executed: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<ToolResult>,
    pub summary: BatchSummary,
}

impl BatchOutcome {
    fn new(results: Vec<ToolResult>, executed: usize) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        let summary = BatchSummary {
            total: results.len(),
            executed,
            success_count,
            failure_count: results.len() - success_count,
        };
        Self { results, summary }
    }
}

pub struct BatchExecutor {
    dispatcher: Dispatcher,
    max_concurrency: usize,
}

impl BatchExecutor {
    pub fn new(dispatcher: Dispatcher, max_concurrency: usize) -> Self {
        Self {
            dispatcher,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Parallel run with default options; one result per call, in input order.
    pub async fn run_batch(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        self.run(calls, BatchOptions::default()).await.results
    }

    pub async fn run(&self, calls: Vec<ToolCall>, options: BatchOptions) -> BatchOutcome {
        let total = calls.len();
        info!(total, parallel = options.parallel, "running batch");
        let outcome = if options.parallel {
            self.run_parallel(calls).await
        } else {
            self.run_sequential(calls, options.stop_on_error).await
        };
        info!(
            total,
            executed = outcome.summary.executed,
            succeeded = outcome.summary.success_count,
            "batch finished"
        );
        outcome
    }

    async fn run_sequential(&self, calls: Vec<ToolCall>, stop_on_error: bool) -> BatchOutcome {
        let total = calls.len();
        let mut results = Vec::with_capacity(total);
        for call in calls {
            let result = isolated_dispatch(&self.dispatcher, call).await;
            let failed = !result.success;
            results.push(result);
            if failed && stop_on_error {
                break;
            }
        }
        let executed = results.len();
        if executed < total {
            debug!(skipped = total - executed, "batch stopped on error");
        }
        while results.len() < total {
            results.push(ToolResult::failure(skipped_error()));
        }
        BatchOutcome::new(results, executed)
    }

    async fn run_parallel(&self, calls: Vec<ToolCall>) -> BatchOutcome {
        let total = calls.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set = JoinSet::new();

        for lane in into_lanes(calls) {
            let dispatcher = self.dispatcher.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let mut finished = Vec::with_capacity(lane.len());
                for (index, call) in lane {
                    let result = match Arc::clone(&semaphore).acquire_owned().await {
                        Ok(_permit) => isolated_dispatch(&dispatcher, call).await,
                        Err(_) => ToolResult::failure(ErrorInfo::unavailable(
                            "Batch executor is shutting down",
                        )),
                    };
                    finished.push((index, result));
                }
                finished
            });
        }

        let mut slots: Vec<Option<ToolResult>> = vec![None; total];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(finished) => {
                    for (index, result) in finished {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => warn!("Batch lane join error: {}", e),
            }
        }

        let results: Vec<ToolResult> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    ToolResult::failure(ErrorInfo::unknown("Batch call did not complete"))
                })
            })
            .collect();
        BatchOutcome::new(results, total)
    }
}

/// Dispatches in a separate task so a panic only costs this call's slot.
async fn isolated_dispatch(dispatcher: &Dispatcher, call: ToolCall) -> ToolResult {
    let dispatcher = dispatcher.clone();
    let tool = call.name.clone();
    match tokio::spawn(async move { dispatcher.dispatch(call).await }).await {
        Ok(result) => result,
        Err(e) => {
            warn!(tool = %tool, "batch call aborted: {}", e);
            ToolResult::failure(ErrorInfo::unknown(format!("Tool '{}' aborted: {}", tool, e)))
        }
    }
}

/// Groups calls by session id, keeping input order inside each group.
/// Calls without a session get a lane of their own.
fn into_lanes(calls: Vec<ToolCall>) -> Vec<Vec<(usize, ToolCall)>> {
    let mut lanes: Vec<Vec<(usize, ToolCall)>> = Vec::new();
    let mut by_session: HashMap<String, usize> = HashMap::new();
    for (index, call) in calls.into_iter().enumerate() {
        match call.session_id().map(str::to_string) {
            Some(session_id) => match by_session.get(&session_id) {
                Some(&lane) => lanes[lane].push((index, call)),
                None => {
                    by_session.insert(session_id, lanes.len());
                    lanes.push(vec![(index, call)]);
                }
            },
            None => lanes.push(vec![(index, call)]),
        }
    }
    lanes
}

fn skipped_error() -> ErrorInfo {
    ErrorInfo::unknown("Skipped: an earlier call in the batch failed")
        .with_leading_suggestion("Fix the failing call or run the batch without stopOnError")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::core::{ExecutorError, ToolExecutor};
    use crate::errors::ErrorCategory;
    use crate::session::SessionManager;
    use crate::testing::{ScriptedExecutor, TestHelper};
    use crate::tools::{register_browser_tools, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn batch_with(executor: Arc<dyn ToolExecutor>, max_concurrency: usize) -> BatchExecutor {
        let mut registry = ToolRegistry::new();
        register_browser_tools(&mut registry, executor).unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(SessionManager::new()))
            .with_cache(Arc::new(ResponseCache::new(32)))
            .with_retry_policy(TestHelper::fast_retry_policy());
        BatchExecutor::new(dispatcher, max_concurrency)
    }

    fn navigate(url: &str) -> ToolCall {
        ToolCall::from_json("navigate", json!({ "url": url }))
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let batch = batch_with(Arc::new(ScriptedExecutor::new()), 4);
        let results = batch
            .run_batch(vec![
                ToolCall::from_json("get_element_text", json!({})),
                navigate("https://example.com"),
                ToolCall::new("no_such_tool", Map::new()),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].error.as_ref().unwrap().category, ErrorCategory::InvalidInput);
        assert!(results[1].success);
        assert_eq!(results[2].error.as_ref().unwrap().category, ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let batch = batch_with(Arc::new(ScriptedExecutor::new()), 2);
        let outcome = batch.run(Vec::new(), BatchOptions::default()).await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.summary.total, 0);
    }

    #[tokio::test]
    async fn test_session_lanes_preserve_order() {
        let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(2)));
        let batch = batch_with(executor, 4);

        let mut calls = Vec::new();
        for i in 0..8 {
            for session in ["a", "b"] {
                calls.push(navigate(&format!("https://example.com/{}/{}", session, i)).in_session(session));
            }
            calls.push(navigate("https://example.com/loose"));
        }
        let results = batch.run_batch(calls).await;
        assert!(results.iter().all(|r| r.success));

        for session in ["a", "b"] {
            let snapshot = batch.dispatcher.sessions().get_session(session).await.unwrap();
            let urls: Vec<String> = snapshot
                .actions
                .iter()
                .map(|a| a.arguments["url"].as_str().unwrap().to_string())
                .collect();
            let expected: Vec<String> = (0..8)
                .map(|i| format!("https://example.com/{}/{}", session, i))
                .collect();
            assert_eq!(urls, expected);
        }
    }

    #[tokio::test]
    async fn test_stop_on_error_skips_remaining_calls() {
        let executor = Arc::new(
            ScriptedExecutor::new().with_error("click", ExecutorError::NotFound("#buy".to_string())),
        );
        let batch = batch_with(executor.clone(), 4);
        let outcome = batch
            .run(
                vec![
                    navigate("https://shop.example.com"),
                    ToolCall::from_json("click", json!({"selector": "#buy"})),
                    ToolCall::from_json("get_page_content", json!({})),
                ],
                BatchOptions {
                    parallel: false,
                    stop_on_error: true,
                },
            )
            .await;

        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results[0].success);
        assert_eq!(outcome.results[1].error.as_ref().unwrap().category, ErrorCategory::NotFound);
        let skipped = outcome.results[2].error.as_ref().unwrap();
        assert_eq!(skipped.category, ErrorCategory::Unknown);
        assert!(skipped.message.starts_with("Skipped"));
        assert_eq!(executor.call_count("get_page_content"), 0);
        assert_eq!(
            outcome.summary,
            BatchSummary {
                total: 3,
                executed: 2,
                success_count: 1,
                failure_count: 2
            }
        );
    }

    /// Tracks how many calls are in flight at once.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ToolExecutor for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn execute(
            &self,
            _tool_name: &str,
            _arguments: &Map<String, Value>,
        ) -> std::result::Result<Value, ExecutorError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_ceiling() {
        let gauge = Arc::new(Gauge::default());
        let batch = batch_with(gauge.clone(), 2);
        let calls = (0..6)
            .map(|i| navigate(&format!("https://example.com/{}", i)))
            .collect();
        let results = batch.run_batch(calls).await;

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.success));
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 1);
    }

    /// Hangs on `get_page_content`, answers everything else at once.
    struct StallsOnRead;

    #[async_trait]
    impl ToolExecutor for StallsOnRead {
        fn name(&self) -> &str {
            "stalls-on-read"
        }

        async fn execute(
            &self,
            tool_name: &str,
            _arguments: &Map<String, Value>,
        ) -> std::result::Result<Value, ExecutorError> {
            if tool_name == "get_page_content" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(json!({ "tool": tool_name }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_call_does_not_fail_its_siblings() {
        let batch = batch_with(Arc::new(StallsOnRead), 4);
        let start = tokio::time::Instant::now();
        let results = batch
            .run_batch(vec![
                navigate("https://a.test"),
                ToolCall::from_json("get_page_content", json!({})).with_timeout_ms(500),
                navigate("https://b.test"),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert_eq!(results[1].error.as_ref().unwrap().category, ErrorCategory::Timeout);
        assert!(results[2].success);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_lanes_group_by_session() {
        let calls = vec![
            navigate("https://a.test").in_session("s"),
            navigate("https://b.test"),
            navigate("https://c.test").in_session("s"),
        ];
        let lanes = into_lanes(calls);
        let indices: Vec<Vec<usize>> = lanes
            .iter()
            .map(|lane| lane.iter().map(|(i, _)| *i).collect())
            .collect();
        assert_eq!(indices, vec![vec![0, 2], vec![1]]);
    }
}
