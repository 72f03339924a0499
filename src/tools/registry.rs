use crate::errors::{Result, ServerError};
use crate::tools::base::{ToolDescriptor, ToolHandler};
use std::collections::HashMap;
use std::sync::Arc;

/// A descriptor paired with the handler that implements it.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

/// Catalog of invocable tools.
///
/// Filled once at startup through `&mut self`, then shared read-only behind an
/// `Arc`; lookups on the dispatch path take no lock.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if self.index.contains_key(&descriptor.name) {
            return Err(ServerError::DuplicateName(descriptor.name));
        }
        tracing::debug!(tool = %descriptor.name, cacheable = descriptor.cacheable, "registered tool");
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
        Ok(())
    }

    pub fn register_handler<H: ToolHandler + 'static>(
        &mut self,
        descriptor: ToolDescriptor,
        handler: H,
    ) -> Result<()> {
        self.register(descriptor, Arc::new(handler))
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors in registration order
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered names sharing a prefix or substring with `name`, for "did you mean" hints.
    pub fn similar_names(&self, name: &str) -> Vec<&str> {
        let needle = name.to_lowercase();
        // last word carries the meaning: "site_screenshot" still finds "take_screenshot"
        let stem = needle.rsplit('_').next().unwrap_or(&needle);
        self.tool_names()
            .into_iter()
            .filter(|candidate| {
                let candidate = candidate.to_lowercase();
                stem.len() >= 3
                    && (candidate.contains(stem) || needle.contains(&candidate))
            })
            .take(3)
            .collect()
    }
}
