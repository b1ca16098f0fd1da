//! Tool: execute_command — one-shot shell command inside the workspace.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use huginn_core::config::ToolsConfig;

use super::guard::workspace_root;
use super::{arg_str, Tool, ToolResult};

/// Maximum characters of combined output returned to the LLM.
const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct ExecuteCommandTool {
    workspace: PathBuf,
    timeout: Duration,
}

impl ExecuteCommandTool {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            workspace: workspace_root(config),
            timeout: Duration::from_secs(config.exec_timeout_secs),
        }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command via `sh -c` with the workspace as the \
         working directory, returning stdout and stderr."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                }
            },
            "required": ["command"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(command) = arg_str(&input, "command") else {
            return ToolResult::error("missing required parameter: command");
        };

        let output = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .output()
            .await
        {
            Ok(o) => o,
            Err(e) => return ToolResult::error(format!("failed to spawn command: {e}")),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut text = String::new();
        if !stdout.is_empty() {
            text.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(&stderr);
        }
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            text.push_str(&format!("\n[exit code: {code}]"));
        }
        if text.is_empty() {
            text = "(no output)".to_string();
        }
        if text.len() > MAX_OUTPUT_CHARS {
            text.truncate(MAX_OUTPUT_CHARS);
            text.push_str("\n\n[output truncated]");
        }

        if output.status.success() {
            ToolResult::success(text)
        } else {
            ToolResult::error(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ExecuteCommandTool {
        ExecuteCommandTool {
            workspace: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let result = tool()
            .execute(serde_json::json!({"command": "echo hello"}))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error_with_code() {
        let result = tool()
            .execute(serde_json::json!({"command": "exit 3"}))
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("[exit code: 3]"));
    }

    #[tokio::test]
    async fn runs_in_the_workspace_directory() {
        let result = tool().execute(serde_json::json!({"command": "pwd"})).await;
        let reported = std::path::PathBuf::from(result.content.trim());
        let expected = std::env::temp_dir().canonicalize().unwrap();
        assert_eq!(reported.canonicalize().unwrap(), expected);
    }
}
