//! Built-in browser tools.
//!
//! Most tools forward their validated arguments to the injected
//! [`ToolExecutor`] under the tool's own name. `take_screenshot` also stores
//! the capture on the calling session, and `wait_for_element` is driven from
//! here by polling `check_element_exists`.

use crate::core::{ExecutorError, ToolExecutor};
use crate::errors::{ErrorInfo, Result};
use crate::retry::{retry_until, RetryPolicy};
use crate::session::ArtifactRef;
use crate::tools::base::{ToolCategory, ToolContext, ToolDescriptor, ToolEffect, ToolHandler};
use crate::tools::registry::ToolRegistry;
use crate::tools::schema::{Field, InputSchema};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_WAIT_SECS: u64 = 10;

/// Passes the call straight through to the executor.
pub struct ForwardingHandler {
    executor: Arc<dyn ToolExecutor>,
    /// At least one of these arguments must be present
    any_of: &'static [&'static str],
}

impl ForwardingHandler {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            executor,
            any_of: &[],
        }
    }

    pub fn requiring_any_of(mut self, fields: &'static [&'static str]) -> Self {
        self.any_of = fields;
        self
    }
}

#[async_trait]
impl ToolHandler for ForwardingHandler {
    fn validate(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Map<String, Value>,
    ) -> std::result::Result<(), ErrorInfo> {
        descriptor.input_schema.validate(arguments)?;
        if !self.any_of.is_empty() && !self.any_of.iter().any(|f| arguments.contains_key(*f)) {
            return Err(ErrorInfo::invalid_input(format!(
                "one of {} is required",
                self.any_of.join(", ")
            ))
            .with_leading_suggestion(format!("Provide '{}'", self.any_of[0])));
        }
        Ok(())
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> std::result::Result<Value, ExecutorError> {
        self.executor.execute(&context.tool_name, arguments).await
    }
}

/// Captures the page and records the image as a session artifact.
pub struct ScreenshotHandler {
    executor: Arc<dyn ToolExecutor>,
}

impl ScreenshotHandler {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolHandler for ScreenshotHandler {
    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> std::result::Result<Value, ExecutorError> {
        let mut value = self.executor.execute(&context.tool_name, arguments).await?;

        let name = arguments
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!("screenshot_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S%3f"))
            });

        let artifact = match &value {
            Value::Object(data) => screenshot_artifact(data),
            _ => None,
        };
        if let (Some(artifact), Value::Object(data)) = (artifact, &mut value) {
            if context.record_artifact(&name, artifact).await {
                data.insert("artifact".to_string(), Value::String(name));
            }
        }
        Ok(value)
    }
}

/// Backends answer with either a `path` or base64 `data` (plus optional `mime_type`).
fn screenshot_artifact(data: &Map<String, Value>) -> Option<ArtifactRef> {
    if let Some(path) = data.get("path").and_then(Value::as_str) {
        return Some(ArtifactRef::path(path));
    }
    let encoded = data.get("data").and_then(Value::as_str)?;
    let mime_type = data
        .get("mime_type")
        .and_then(Value::as_str)
        .unwrap_or("image/png");
    Some(ArtifactRef::inline_base64(mime_type, encoded.to_string()))
}

/// Polls `check_element_exists` until the element shows up or the wait runs out.
pub struct WaitForElementHandler {
    executor: Arc<dyn ToolExecutor>,
}

impl WaitForElementHandler {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolHandler for WaitForElementHandler {
    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> std::result::Result<Value, ExecutorError> {
        let selector = arguments
            .get("selector")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let wait = arguments
            .get("timeout")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_WAIT_SECS))
            .min(context.timeout);

        let polls = (wait.as_millis() / WAIT_POLL_INTERVAL.as_millis()).max(1) as u32;
        let policy = RetryPolicy::new(polls + 1)
            .with_base_delay(WAIT_POLL_INTERVAL)
            .with_backoff_multiplier(1.0)
            .with_jitter(false)
            .with_deadline(Instant::now() + wait);

        let mut lookup = Map::new();
        lookup.insert("selector".to_string(), Value::String(selector.clone()));
        let started = Instant::now();
        let last = retry_until(
            &policy,
            || self.executor.execute("check_element_exists", &lookup),
            |outcome| matches!(outcome, Ok(value) if element_exists(value)),
        )
        .await;

        match last {
            Ok(value) if element_exists(&value) => Ok(json!({
                "selector": selector,
                "found": true,
                "waited_ms": started.elapsed().as_millis() as u64,
            })),
            // Transport-level failures are more useful than a generic timeout
            Err(ExecutorError::Unavailable(msg)) => Err(ExecutorError::Unavailable(msg)),
            _ => Err(ExecutorError::Timeout(format!(
                "Element '{}' did not appear within {}ms",
                selector,
                wait.as_millis()
            ))),
        }
    }
}

fn element_exists(value: &Value) -> bool {
    value.get("exists").and_then(Value::as_bool).unwrap_or(false)
}

fn selector_field() -> Field {
    Field::string("selector", "CSS selector of the target element")
}

/// Registers the browser tool catalog, all backed by `executor`.
pub fn register_browser_tools(
    registry: &mut ToolRegistry,
    executor: Arc<dyn ToolExecutor>,
) -> Result<()> {
    use ToolCategory::*;

    let forward = || ForwardingHandler::new(Arc::clone(&executor));

    // Navigation
    registry.register_handler(
        ToolDescriptor::new(
            "navigate",
            "Navigate the browser to a URL",
            InputSchema::object()
                .field(Field::string("url", "Absolute URL to open").required().uri())
                .field(
                    Field::boolean("wait_for_load", "Wait for the load event")
                        .default_value(json!(true)),
                ),
        )
        .with_category(BrowserControl)
        .with_effect(ToolEffect::Idempotent),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new("go_back", "Navigate back in browser history", InputSchema::object())
            .with_category(BrowserControl),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new("refresh", "Reload the current page", InputSchema::object())
            .with_category(BrowserControl)
            .with_effect(ToolEffect::Idempotent),
        forward(),
    )?;

    // Interaction
    registry.register_handler(
        ToolDescriptor::new(
            "click",
            "Click an element located by selector or visible text",
            InputSchema::object()
                .field(selector_field())
                .field(Field::string("text", "Visible text of the element"))
                .field(Field::number("wait_after", "Seconds to wait after clicking").range(0.0, 60.0)),
        )
        .with_category(Interaction),
        forward().requiring_any_of(&["selector", "text"]),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "type_text",
            "Type text into an input field",
            InputSchema::object()
                .field(Field::string("text", "Text to type").required())
                .field(selector_field())
                .field(Field::boolean("clear_first", "Clear the field first").default_value(json!(true)))
                .field(Field::boolean("press_enter", "Press Enter afterwards")),
        )
        .with_category(Interaction),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "select_option",
            "Select an option from a dropdown",
            InputSchema::object()
                .field(selector_field().required())
                .field(Field::string("value", "Option value or label").required()),
        )
        .with_category(Interaction)
        .with_effect(ToolEffect::Idempotent),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "scroll",
            "Scroll the page",
            InputSchema::object()
                .field(
                    Field::string("direction", "Scroll direction")
                        .required()
                        .one_of(&["up", "down", "top", "bottom"]),
                )
                .field(Field::integer("amount", "Pixels to scroll").min(0.0)),
        )
        .with_category(Interaction),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "fill_form",
            "Fill form fields keyed by selector or field name",
            InputSchema::object()
                .field(Field::object("form_data", "Field values to enter").required())
                .field(Field::boolean("submit", "Submit the form afterwards")),
        )
        .with_category(Interaction),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "execute_javascript",
            "Run a JavaScript snippet in the page and return its result",
            InputSchema::object().field(Field::string("script", "JavaScript source").required()),
        )
        .with_category(Interaction),
        forward(),
    )?;

    // Extraction
    registry.register_handler(
        ToolDescriptor::new(
            "get_page_content",
            "Extract the text content of the current page",
            InputSchema::object().field(Field::boolean("include_hidden", "Include hidden text")),
        )
        .with_category(Extraction)
        .cacheable(),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "get_element_text",
            "Get the text of a specific element",
            InputSchema::object().field(selector_field().required()),
        )
        .with_category(Extraction)
        .cacheable(),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "extract_links",
            "Extract all links from the page",
            InputSchema::object().field(Field::string("pattern", "Only links matching this pattern")),
        )
        .with_category(Extraction)
        .cacheable(),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "extract_images",
            "Extract image URLs from the page",
            InputSchema::object().field(Field::integer("min_size", "Minimum width in pixels").min(0.0)),
        )
        .with_category(Extraction)
        .cacheable(),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "take_screenshot",
            "Capture the current page and store it on the session",
            InputSchema::object()
                .field(Field::string("filename", "Artifact name"))
                .field(Field::boolean("full_page", "Capture the full scrollable page")),
        )
        .with_category(Extraction)
        .with_effect(ToolEffect::ReadOnly),
        ScreenshotHandler::new(Arc::clone(&executor)),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "get_page_metrics",
            "Collect page performance metrics",
            InputSchema::object(),
        )
        .with_category(Extraction)
        .cacheable(),
        forward(),
    )?;

    // Validation
    registry.register_handler(
        ToolDescriptor::new(
            "check_element_exists",
            "Check whether an element exists on the page",
            InputSchema::object().field(selector_field().required()),
        )
        .with_category(Validation)
        .cacheable(),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "wait_for_element",
            "Wait for an element to appear",
            InputSchema::object()
                .field(selector_field().required())
                .field(Field::integer("timeout", "Seconds to wait").range(0.0, 300.0)),
        )
        .with_category(Validation)
        .with_effect(ToolEffect::ReadOnly),
        WaitForElementHandler::new(Arc::clone(&executor)),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "accessibility_audit",
            "Run an accessibility audit of the current page",
            InputSchema::object()
                .field(Field::string("level", "WCAG level").one_of(&["A", "AA", "AAA"])),
        )
        .with_category(Validation)
        .cacheable(),
        forward(),
    )?;
    registry.register_handler(
        ToolDescriptor::new(
            "performance_audit",
            "Run a performance audit of the current page",
            InputSchema::object(),
        )
        .with_category(Validation)
        .cacheable(),
        forward(),
    )?;

    tracing::info!(executor = executor.name(), tools = registry.len(), "registered browser tools");
    Ok(())
}
