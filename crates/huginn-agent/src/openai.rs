//! OpenAI-wire-compatible chat client: non-streaming and SSE streaming,
//! including incremental tool-call assembly.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use huginn_sessions::{ChatMessage, Role};

use crate::provider::{
    ChatRequest, ChatResponse, LlmProvider, ProviderError, StreamChunk, ToolCall, Usage,
};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    /// Path appended to base_url for chat completions.
    chat_path: String,
}

impl OpenAiProvider {
    /// `base_url` without a trailing slash; `chat_path` starting with `/`.
    pub fn new(api_key: String, base_url: String, chat_path: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
            chat_path,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req, false);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, messages = req.messages.len(), "sending chat request");

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        // Dropping the future aborts the underlying HTTP request.
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            resp = send => resp?,
        };

        let resp = check_status(resp).await?;
        let api_resp: ApiResponse = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            parsed = resp.json() => parsed.map_err(|e| ProviderError::Parse(e.to_string()))?,
        };

        Ok(parse_response(api_resp))
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req, true);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, "sending streaming chat request");

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            resp = send => resp?,
        };
        let resp = check_status(resp).await?;

        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            assembled = process_stream(resp, req.model.clone(), tx) => assembled,
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status().as_u16();
    if status == 429 {
        let retry = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|s| s * 1000)
            .unwrap_or(5000);
        return Err(ProviderError::RateLimited {
            retry_after_ms: retry,
        });
    }
    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, "chat API error");
        return Err(ProviderError::Api {
            status,
            message: text,
        });
    }
    Ok(resp)
}

pub(crate) fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req.messages.iter().map(message_to_wire).collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "stream": stream,
    });

    if stream {
        // Ask for token usage on the final chunk.
        body["stream_options"] = serde_json::json!({ "include_usage": true });
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

/// Serialize one history entry to the OpenAI message format.
fn message_to_wire(msg: &ChatMessage) -> serde_json::Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<serde_json::Value> = msg
                .tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::json!(msg.content)
            };
            serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
            })
        }
        _ => serde_json::json!({
            "role": msg.role.as_str(),
            "content": msg.content,
        }),
    }
}

pub(crate) fn parse_response(resp: ApiResponse) -> ChatResponse {
    let choice = resp.choices.into_iter().next();

    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.clone())
        .filter(|c| !c.is_empty());

    let tool_calls: Vec<ToolCall> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: serde_json::from_str(&tc.function.arguments)
                        .unwrap_or(serde_json::json!({})),
                })
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();

    ChatResponse {
        content,
        tool_calls,
        finish_reason,
        usage: resp
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.prompt_tokens + u.completion_tokens,
            })
            .unwrap_or_default(),
        model: resp.model,
    }
}

/// Accumulates streamed tool-call fragments keyed by choice index.
///
/// Chunks carry `{index, id?, function: {name?, arguments?}}`; argument
/// characters may arrive before the id or name for the same index and must
/// still land on the same entry.
#[derive(Default)]
pub(crate) struct ToolCallAssembler {
    entries: BTreeMap<usize, PartialCall>,
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    pub(crate) fn apply(&mut self, delta: &StreamToolCallDelta) {
        let entry = self.entries.entry(delta.index).or_default();
        if let Some(id) = &delta.id {
            entry.id = id.clone();
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                entry.name = name.clone();
            }
            if let Some(fragment) = &function.arguments {
                entry.arguments.push_str(fragment);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn finish(self) -> Vec<ToolCall> {
        self.entries
            .into_values()
            .map(|p| ToolCall {
                id: p.id,
                name: p.name,
                arguments: serde_json::from_str(&p.arguments).unwrap_or(serde_json::json!({})),
            })
            .collect()
    }
}

/// Read the SSE byte stream, emit text deltas, and assemble the final
/// response (content, tool calls, usage, finish reason).
async fn process_stream(
    resp: reqwest::Response,
    model: String,
    tx: mpsc::Sender<StreamChunk>,
) -> Result<ChatResponse, ProviderError> {
    use futures_util::StreamExt;

    let mut content = String::new();
    let mut assembler = ToolCallAssembler::default();
    let mut usage = Usage::default();
    let mut finish_reason = String::new();
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(ProviderError::Http)?;
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // SSE frames arrive split across TCP chunks; keep the trailing
        // partial line in the buffer.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data.trim() == "[DONE]" {
                break 'outer;
            }

            let Ok(parsed) = serde_json::from_str::<StreamChunkJson>(data) else {
                continue;
            };

            if let Some(u) = &parsed.usage {
                usage = Usage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.prompt_tokens + u.completion_tokens,
                };
            }

            for choice in &parsed.choices {
                if let Some(reason) = &choice.finish_reason {
                    if !reason.is_empty() {
                        finish_reason = reason.clone();
                    }
                }
                if let Some(text) = &choice.delta.content {
                    if !text.is_empty() {
                        content.push_str(text);
                        if tx
                            .send(StreamChunk::TextDelta { text: text.clone() })
                            .await
                            .is_err()
                        {
                            // Receiver dropped; keep assembling for the
                            // final response.
                            debug!("stream receiver dropped");
                        }
                    }
                }
                if let Some(deltas) = &choice.delta.tool_calls {
                    for delta in deltas {
                        assembler.apply(delta);
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let tool_calls = if assembler.is_empty() {
        Vec::new()
    } else {
        assembler.finish()
    };

    Ok(ChatResponse {
        content: if content.is_empty() { None } else { Some(content) },
        tool_calls,
        finish_reason,
        usage,
        model,
    })
}

// OpenAI API response types.

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    #[serde(default)]
    pub(crate) model: String,
    pub(crate) choices: Vec<Choice>,
    pub(crate) usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
pub(crate) struct Choice {
    pub(crate) message: ApiMessage,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ApiMessage {
    pub(crate) content: Option<String>,
    pub(crate) tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
pub(crate) struct ApiToolCall {
    pub(crate) id: String,
    pub(crate) function: ApiFunction,
}

#[derive(Deserialize)]
pub(crate) struct ApiFunction {
    pub(crate) name: String,
    pub(crate) arguments: String,
}

#[derive(Deserialize)]
pub(crate) struct ApiUsage {
    pub(crate) prompt_tokens: u32,
    pub(crate) completion_tokens: u32,
}

// OpenAI streaming chunk types.

#[derive(Deserialize)]
struct StreamChunkJson {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize)]
pub(crate) struct StreamToolCallDelta {
    pub(crate) index: usize,
    pub(crate) id: Option<String>,
    pub(crate) function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize)]
pub(crate) struct StreamFunctionDelta {
    pub(crate) name: Option<String>,
    pub(crate) arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use huginn_sessions::ToolCallRequest;

    #[test]
    fn body_serializes_roles_and_tools() {
        let req = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage::system("be helpful"),
                ChatMessage::user("add 2+3"),
                ChatMessage::assistant_with_tools(
                    "",
                    vec![ToolCallRequest {
                        id: "call_1".into(),
                        name: "calculator".into(),
                        arguments: serde_json::json!({"a": 2, "b": 3}),
                    }],
                ),
                ChatMessage::tool("call_1", "5"),
            ],
            tools: vec![crate::provider::ToolDefinition {
                name: "calculator".into(),
                description: "adds".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
            max_tokens: 100,
            temperature: 0.2,
        };

        let body = build_request_body(&req, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["name"], "calculator");
        assert_eq!(messages[2]["content"], serde_json::Value::Null);
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn streaming_body_requests_usage() {
        let req = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
            max_tokens: 10,
            temperature: 0.0,
        };
        let body = build_request_body(&req, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn parse_extracts_tool_calls_and_usage() {
        let raw = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"a\":2,\"b\":3}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        });
        let api: ApiResponse = serde_json::from_value(raw).unwrap();
        let resp = parse_response(api);
        assert_eq!(resp.content, None);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["a"], 2);
        assert_eq!(resp.finish_reason, "tool_calls");
        assert_eq!(resp.usage.total_tokens, 19);
    }

    #[test]
    fn assembler_concatenates_fragments_by_index() {
        let mut assembler = ToolCallAssembler::default();
        let deltas: Vec<StreamToolCallDelta> = vec![
            serde_json::from_value(serde_json::json!({
                "index": 0, "id": "call_a",
                "function": {"name": "calculator", "arguments": "{\"a\""}
            }))
            .unwrap(),
            serde_json::from_value(serde_json::json!({
                "index": 0, "function": {"arguments": ":2,\"b\":3}"}
            }))
            .unwrap(),
        ];
        for d in &deltas {
            assembler.apply(d);
        }
        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, serde_json::json!({"a": 2, "b": 3}));
    }

    #[test]
    fn assembler_binds_late_id_and_name_to_same_index() {
        // Argument characters arrive before the id/name for index 0.
        let mut assembler = ToolCallAssembler::default();
        let first: StreamToolCallDelta = serde_json::from_value(serde_json::json!({
            "index": 0, "function": {"arguments": "{\"a\":1}"}
        }))
        .unwrap();
        let second: StreamToolCallDelta = serde_json::from_value(serde_json::json!({
            "index": 0, "id": "call_late", "function": {"name": "calculator"}
        }))
        .unwrap();
        assembler.apply(&first);
        assembler.apply(&second);

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_late");
        assert_eq!(calls[0].name, "calculator");
        assert_eq!(calls[0].arguments, serde_json::json!({"a": 1}));
    }

    #[test]
    fn assembler_keeps_parallel_calls_separate() {
        let mut assembler = ToolCallAssembler::default();
        for (index, id) in [(0usize, "call_0"), (1usize, "call_1")] {
            let delta: StreamToolCallDelta = serde_json::from_value(serde_json::json!({
                "index": index, "id": id,
                "function": {"name": "calculator", "arguments": "{}"}
            }))
            .unwrap();
            assembler.apply(&delta);
        }
        let calls = assembler.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[1].id, "call_1");
    }
}
