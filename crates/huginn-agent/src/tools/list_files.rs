//! Tool: list_files — list directory contents with type and size info.

use std::path::PathBuf;

use async_trait::async_trait;

use huginn_core::config::ToolsConfig;

use super::guard::{resolve_in_workspace, workspace_root};
use super::{arg_str, Tool, ToolResult};

/// Maximum entries returned to avoid overwhelming the context window.
const MAX_ENTRIES: usize = 1_000;

pub struct ListFilesTool {
    restrict: bool,
    workspace: PathBuf,
}

impl ListFilesTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            restrict: config.restrict_to_workspace,
            workspace: workspace_root(config),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the contents of a directory. Each entry shows its type (file/dir) \
         and size in bytes. Returns at most 1000 entries."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the directory, relative to the workspace. \
                                    Defaults to the workspace root."
                }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let path = arg_str(&input, "path").unwrap_or(".");

        let resolved = match resolve_in_workspace(self.restrict, &self.workspace, path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let read_dir = match std::fs::read_dir(&resolved) {
            Ok(rd) => rd,
            Err(e) => return ToolResult::error(format!("failed to list '{path}': {e}")),
        };

        let mut entries: Vec<String> = Vec::new();
        let mut truncated = false;

        for entry in read_dir {
            if entries.len() >= MAX_ENTRIES {
                truncated = true;
                break;
            }
            let Ok(entry) = entry else { continue };
            let Ok(metadata) = entry.metadata() else { continue };

            let name = entry.file_name().to_string_lossy().to_string();
            let kind = if metadata.is_dir() { "dir" } else { "file" };
            entries.push(format!("[{}] {} ({} bytes)", kind, name, metadata.len()));
        }

        entries.sort();

        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n\n[truncated at {MAX_ENTRIES} entries]"));
        }
        if output.is_empty() {
            output = "(empty directory)".to_string();
        }

        ToolResult::success(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let tool = ListFilesTool {
            restrict: true,
            workspace: dir.path().to_path_buf(),
        };
        let result = tool.execute(serde_json::json!({})).await;
        assert!(!result.is_error);
        let lines: Vec<&str> = result.content.lines().collect();
        assert_eq!(lines[0], "[file] a.txt (1 bytes)");
        assert_eq!(lines[1], "[file] b.txt (2 bytes)");
        assert!(lines[2].starts_with("[dir] sub"));
    }
}
