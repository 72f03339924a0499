use crate::backend::UnavailableExecutor;
use crate::batch::{BatchExecutor, BatchOptions, BatchOutcome};
use crate::cache::ResponseCache;
use crate::core::{Config, ToolExecutor};
use crate::errors::Result;
use crate::retry::RetryPolicy;
use crate::session::SessionManager;
use crate::tools::{register_browser_tools, Dispatcher, ToolDescriptor, ToolHandler, ToolRegistry};
use crate::types::{ToolCall, ToolResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Everything one running server instance owns.
///
/// Transports share a single `Server`; each connection keeps its own protocol
/// state but sees the same tools, cache and sessions.
pub struct Server {
    config: Config,
    registry: Arc<ToolRegistry>,
    cache: Arc<ResponseCache>,
    sessions: Arc<SessionManager>,
    dispatcher: Dispatcher,
    batch: BatchExecutor,
    executor: Arc<dyn ToolExecutor>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn builder(config: Config) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.config.server.name.clone(),
            version: self.config.server.version.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn executor(&self) -> &Arc<dyn ToolExecutor> {
        &self.executor
    }

    pub async fn call_tool(&self, call: ToolCall) -> ToolResult {
        self.dispatcher.dispatch(call).await
    }

    pub async fn run_batch(&self, calls: Vec<ToolCall>, options: BatchOptions) -> BatchOutcome {
        self.batch.run(calls, options).await
    }

    /// Closes idle sessions in the background until [`Server::shutdown`] is called.
    pub fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        let ttl = Duration::from_secs(self.config.session.ttl_secs);
        let interval = Duration::from_secs(self.config.session.sweep_interval_secs);
        self.sessions
            .spawn_sweeper(ttl, interval, self.shutdown.child_token())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        info!("server shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Assembles a [`Server`]; the tool registry is frozen by [`ServerBuilder::build`].
pub struct ServerBuilder {
    config: Config,
    registry: ToolRegistry,
    executor: Option<Arc<dyn ToolExecutor>>,
    browser_tools: bool,
    retry: Option<RetryPolicy>,
}

impl ServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: ToolRegistry::new(),
            executor: None,
            browser_tools: false,
            retry: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Register the built-in browser catalog against the executor at build time.
    pub fn with_browser_tools(mut self) -> Self {
        self.browser_tools = true;
        self
    }

    /// Overrides the policy derived from `config.retry`.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn register(
        mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<Self> {
        self.registry.register(descriptor, handler)?;
        Ok(self)
    }

    pub fn build(self) -> Result<Arc<Server>> {
        let ServerBuilder {
            config,
            mut registry,
            executor,
            browser_tools,
            retry,
        } = self;
        config.validate()?;

        let executor = executor.unwrap_or_else(|| Arc::new(UnavailableExecutor));
        if browser_tools {
            register_browser_tools(&mut registry, Arc::clone(&executor))?;
        }
        let registry = Arc::new(registry);

        let capacity = if config.cache.enabled {
            config.cache.max_size
        } else {
            0
        };
        let mut cache = ResponseCache::new(capacity);
        if let Some(ttl) = config.cache.ttl_secs {
            cache = cache.with_ttl(Duration::from_secs(ttl));
        }
        let cache = Arc::new(cache);
        let sessions = Arc::new(SessionManager::new());

        let retry = retry.unwrap_or_else(|| RetryPolicy::from(&config.retry));
        let mut dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&sessions))
            .with_retry_policy(retry)
            .with_default_timeout(Duration::from_millis(config.tools.default_timeout_ms));
        if config.cache.enabled {
            dispatcher = dispatcher.with_cache(Arc::clone(&cache));
        }
        let batch = BatchExecutor::new(dispatcher.clone(), config.batch.max_concurrency);

        info!(
            name = %config.server.name,
            version = %config.server.version,
            tools = registry.len(),
            executor = executor.name(),
            cache_size = capacity,
            "server ready"
        );
        Ok(Arc::new(Server {
            config,
            registry,
            cache,
            sessions,
            dispatcher,
            batch,
            executor,
            shutdown: CancellationToken::new(),
        }))
    }
}
