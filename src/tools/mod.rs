pub mod base;
pub mod catalog;
pub mod dispatcher;
pub mod registry;
pub mod schema;

pub use base::{ToolCategory, ToolContext, ToolDescriptor, ToolEffect, ToolHandler};
pub use catalog::register_browser_tools;
pub use dispatcher::Dispatcher;
pub use registry::{RegisteredTool, ToolRegistry};
pub use schema::{Field, FieldType, InputSchema};
