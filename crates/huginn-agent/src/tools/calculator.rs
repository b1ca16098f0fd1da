//! Tool: calculator — basic arithmetic on two operands.

use async_trait::async_trait;

use super::{arg_f64, arg_str, Tool, ToolResult};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform basic arithmetic on two numbers. Supported operations: \
         add (default), sub, mul, div."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "First operand." },
                "b": { "type": "number", "description": "Second operand." },
                "op": {
                    "type": "string",
                    "enum": ["add", "sub", "mul", "div"],
                    "description": "Operation to apply. Defaults to add."
                }
            },
            "required": ["a", "b"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(a) = arg_f64(&input, "a") else {
            return ToolResult::error("missing required parameter: a");
        };
        let Some(b) = arg_f64(&input, "b") else {
            return ToolResult::error("missing required parameter: b");
        };

        let result = match arg_str(&input, "op").unwrap_or("add") {
            "add" => a + b,
            "sub" => a - b,
            "mul" => a * b,
            "div" => {
                if b == 0.0 {
                    return ToolResult::error("division by zero");
                }
                a / b
            }
            other => return ToolResult::error(format!("unknown operation: {other}")),
        };

        ToolResult::success(format_number(result))
    }
}

/// Render integers without the trailing `.0`.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_by_default() {
        let result = CalculatorTool
            .execute(serde_json::json!({"a": 2, "b": 3}))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "5");
    }

    #[tokio::test]
    async fn accepts_string_numerics() {
        let result = CalculatorTool
            .execute(serde_json::json!({"a": "2.5", "b": "1.5", "op": "mul"}))
            .await;
        assert_eq!(result.content, "3.75");
    }

    #[tokio::test]
    async fn division_by_zero_is_an_error() {
        let result = CalculatorTool
            .execute(serde_json::json!({"a": 1, "b": 0, "op": "div"}))
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn missing_operand_is_an_error() {
        let result = CalculatorTool.execute(serde_json::json!({"a": 1})).await;
        assert!(result.is_error);
        assert!(result.content.contains("b"));
    }
}
