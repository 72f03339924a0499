pub mod config;
pub mod executor;

pub use config::{
    BatchConfig, CacheConfig, Config, RetryConfig, ServerConfig, SessionConfig, ToolsConfig,
    TransportKind,
};
pub use executor::{ExecutorError, ToolExecutor};
