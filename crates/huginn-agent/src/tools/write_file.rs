//! Tool: write_file — write content to a file, creating parents as needed.

use std::path::PathBuf;

use async_trait::async_trait;

use huginn_core::config::ToolsConfig;

use super::guard::{resolve_in_workspace, workspace_root};
use super::{arg_str, Tool, ToolResult};

pub struct WriteFileTool {
    restrict: bool,
    workspace: PathBuf,
}

impl WriteFileTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            restrict: config.restrict_to_workspace,
            workspace: workspace_root(config),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text content to a file, replacing it if it exists. Parent \
         directories are created automatically."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the workspace."
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write."
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(path) = arg_str(&input, "path") else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(content) = arg_str(&input, "content") else {
            return ToolResult::error("missing required parameter: content");
        };

        let resolved = match resolve_in_workspace(self.restrict, &self.workspace, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("failed to create directories: {e}"));
            }
        }

        match std::fs::write(&resolved, content) {
            Ok(()) => ToolResult::success(format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolResult::error(format!("failed to write '{path}': {e}")),
        }
    }
}
