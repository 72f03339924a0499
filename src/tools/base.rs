use crate::core::ExecutorError;
use crate::errors::ErrorInfo;
use crate::session::{ArtifactRef, SessionManager};
use crate::tools::schema::InputSchema;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Grouping used when listing tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    BrowserControl,
    Interaction,
    Extraction,
    Validation,
    Utility,
}

/// What running a tool does to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolEffect {
    /// Only observes the page
    ReadOnly,
    /// Changes the page, but repeating it lands in the same state
    Idempotent,
    /// Changes the page in a way a repeat would compound (a second click, a second submit)
    Mutating,
}

impl ToolEffect {
    /// A timed-out attempt may have run on the backend anyway; only these may be resent.
    pub fn is_repeatable(&self) -> bool {
        !matches!(self, ToolEffect::Mutating)
    }

    pub fn changes_page(&self) -> bool {
        !matches!(self, ToolEffect::ReadOnly)
    }
}

/// Immutable description of a registered tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub category: ToolCategory,
    /// Side-effect free and idempotent, so results may be served from the cache.
    #[serde(skip)]
    pub cacheable: bool,
    #[serde(skip)]
    pub effect: ToolEffect,
}

impl ToolDescriptor {
    /// New tools are treated as [`ToolEffect::Mutating`] until declared otherwise.
    pub fn new(name: &str, description: &str, input_schema: InputSchema) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            category: ToolCategory::Utility,
            cacheable: false,
            effect: ToolEffect::Mutating,
        }
    }

    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_effect(mut self, effect: ToolEffect) -> Self {
        self.effect = effect;
        self
    }

    /// Marks the tool cacheable, which implies it is read-only.
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self.effect = ToolEffect::ReadOnly;
        self
    }
}

/// Typed capability behind a tool name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Checks arguments before execution; the default enforces the descriptor's schema.
    fn validate(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Map<String, Value>,
    ) -> Result<(), ErrorInfo> {
        descriptor.input_schema.validate(arguments)
    }

    async fn execute(
        &self,
        arguments: &Map<String, Value>,
        context: &ToolContext,
    ) -> Result<Value, ExecutorError>;
}

/// Context provided to handlers during execution
#[derive(Clone)]
pub struct ToolContext {
    pub tool_name: String,
    pub session_id: Option<String>,
    pub timeout: Duration,
    sessions: Option<Arc<SessionManager>>,
}

impl ToolContext {
    pub fn new(tool_name: &str, timeout: Duration) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            session_id: None,
            timeout,
            sessions: None,
        }
    }

    pub fn with_session(mut self, session_id: String, sessions: Arc<SessionManager>) -> Self {
        self.session_id = Some(session_id);
        self.sessions = Some(sessions);
        self
    }

    /// Stores an artifact on the calling session. Returns false when the call has no session.
    pub async fn record_artifact(&self, name: &str, reference: ArtifactRef) -> bool {
        match (&self.session_id, &self.sessions) {
            (Some(session_id), Some(sessions)) => {
                match sessions.add_artifact(session_id, name, reference).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, artifact = name, "failed to record artifact: {}", e);
                        false
                    }
                }
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("tool_name", &self.tool_name)
            .field("session_id", &self.session_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}
