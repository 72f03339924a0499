pub mod backend;
pub mod batch;
pub mod cache;
pub mod core;
pub mod errors;
pub mod protocol;
pub mod retry;
pub mod server;
pub mod session;
pub mod testing;
pub mod tools;
pub mod types;

pub use batch::{BatchExecutor, BatchOptions, BatchOutcome, BatchSummary};
pub use cache::{cache_key, CacheStats, ResponseCache};
pub use crate::core::{Config, ExecutorError, ToolExecutor};
pub use errors::{ErrorCategory, ErrorInfo, Result, ServerError};
pub use retry::{with_retry, RetryPolicy, RetryableOperation};
pub use server::{Server, ServerBuilder};
pub use session::{SessionManager, SessionSnapshot};
pub use tools::{Dispatcher, ToolDescriptor, ToolHandler, ToolRegistry};
pub use types::*;
