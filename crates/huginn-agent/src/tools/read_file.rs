//! Tool: read_file — read the contents of a file from disk.

use std::path::PathBuf;

use async_trait::async_trait;

use huginn_core::config::ToolsConfig;

use super::guard::{resolve_in_workspace, workspace_root};
use super::{arg_i64, arg_str, Tool, ToolResult};

/// Maximum characters returned to avoid flooding the context window.
const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct ReadFileTool {
    restrict: bool,
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            restrict: config.restrict_to_workspace,
            workspace: workspace_root(config),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Optionally limit to a line range with \
         `offset` (1-based first line) and `limit` (number of lines to return)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the workspace."
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start reading from (optional)."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (optional)."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(path) = arg_str(&input, "path") else {
            return ToolResult::error("missing required parameter: path");
        };

        let resolved = match resolve_in_workspace(self.restrict, &self.workspace, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let content = match std::fs::read_to_string(&resolved) {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read '{path}': {e}")),
        };

        let offset = arg_i64(&input, "offset").map(|v| (v.max(1) - 1) as usize);
        let limit = arg_i64(&input, "limit").map(|v| v.max(0) as usize);

        let result = if offset.is_some() || limit.is_some() {
            let start = offset.unwrap_or(0);
            let lines: Vec<&str> = content.lines().skip(start).collect();
            let lines = if let Some(n) = limit {
                &lines[..n.min(lines.len())]
            } else {
                &lines[..]
            };
            lines.join("\n")
        } else {
            content
        };

        let result = if result.len() > MAX_OUTPUT_CHARS {
            format!(
                "{}\n\n[output truncated at {} characters]",
                &result[..MAX_OUTPUT_CHARS],
                MAX_OUTPUT_CHARS,
            )
        } else {
            result
        };

        ToolResult::success(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_in(dir: &std::path::Path) -> ReadFileTool {
        ReadFileTool {
            restrict: true,
            workspace: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn reads_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "line1\nline2\nline3").unwrap();

        let result = tool_in(dir.path())
            .execute(serde_json::json!({"path": "hello.txt"}))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "line1\nline2\nline3");
    }

    #[tokio::test]
    async fn honors_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "a\nb\nc\nd").unwrap();

        let result = tool_in(dir.path())
            .execute(serde_json::json!({"path": "hello.txt", "offset": 2, "limit": "2"}))
            .await;
        assert_eq!(result.content, "b\nc");
    }

    #[tokio::test]
    async fn rejects_path_outside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let result = tool_in(dir.path())
            .execute(serde_json::json!({"path": "/etc/hostname"}))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("outside the workspace"));
    }
}
