use std::sync::Arc;

use tracing::{debug, warn};

use crate::provider::ToolDefinition;

use super::{Tool, ToolResult};

/// Lookup of named tools with typed parameter schemas.
///
/// Registration order is preserved so `definitions()` is deterministic.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. A tool with an already-registered name replaces the
    /// earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            warn!(tool = tool.name(), "replacing registered tool");
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    /// `(name, description)` pairs in registration order.
    pub fn list(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect()
    }

    /// Serialize every tool to the provider's function-tool format.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool by name under its own deadline.
    ///
    /// Unknown names and timeouts come back as error results, never as
    /// panics or propagated errors — the loop feeds them to the LLM and
    /// continues.
    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> ToolResult {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return ToolResult::error(format!("unknown tool: {name}"));
        };

        debug!(tool = name, "executing tool");
        match tokio::time::timeout(tool.timeout(), tool.execute(args)).await {
            Ok(result) => result,
            Err(_) => ToolResult::error(format!(
                "tool '{}' timed out after {:?}",
                name,
                tool.timeout()
            )),
        }
    }
}
