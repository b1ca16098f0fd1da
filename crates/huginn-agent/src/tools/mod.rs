//! Tool system for agent tool calling.
//!
//! A tool is anything with a name, a description, a JSON-schema-shaped
//! parameter object, and an async `execute`. The registry maps names to
//! tools and serializes their schemas for the provider.

pub mod calculator;
pub mod execute_command;
pub mod guard;
pub mod list_files;
pub mod read_file;
pub mod registry;
pub mod schedule_reminder;
pub mod write_file;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
///
/// Execution should be idempotent unless the tool's description says
/// otherwise.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique snake_case name (e.g. "read_file").
    fn name(&self) -> &str;
    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Deadline for one invocation. 60 s suits shell-class tools; fast
    /// in-process tools may tighten it.
    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }
    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Read a string argument.
pub fn arg_str<'a>(input: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

/// Read an integer argument, accepting a JSON number, a float with no
/// fraction, or a numeric string. Anything else is `None`.
pub fn arg_i64(input: &serde_json::Value, key: &str) -> Option<i64> {
    match input.get(key)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a float argument, accepting a JSON number or a numeric string.
pub fn arg_f64(input: &serde_json::Value, key: &str) -> Option<f64> {
    match input.get(key)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i64_accepts_number_string_and_float() {
        let input = serde_json::json!({"a": 5, "b": "7", "c": 9.0, "d": 9.5, "e": [1]});
        assert_eq!(arg_i64(&input, "a"), Some(5));
        assert_eq!(arg_i64(&input, "b"), Some(7));
        assert_eq!(arg_i64(&input, "c"), Some(9));
        assert_eq!(arg_i64(&input, "d"), None);
        assert_eq!(arg_i64(&input, "e"), None);
        assert_eq!(arg_i64(&input, "missing"), None);
    }

    #[test]
    fn f64_accepts_number_and_string() {
        let input = serde_json::json!({"x": 2.5, "y": "3.25"});
        assert_eq!(arg_f64(&input, "x"), Some(2.5));
        assert_eq!(arg_f64(&input, "y"), Some(3.25));
    }
}
