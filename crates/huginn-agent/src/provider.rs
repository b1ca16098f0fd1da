use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use huginn_sessions::ChatMessage;

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped parameter object.
    pub parameters: serde_json::Value,
}

/// A tool call extracted from the LLM response.
///
/// The `id` must survive the round-trip so the engine can match `tool`
/// messages back to the announcing assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Full conversation including the leading system message; serialized to
    /// the provider's wire format by the implementation.
    pub messages: Vec<ChatMessage>,
    /// Tools to expose. Empty disables tool calling.
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Response from an LLM provider (non-streaming, or assembled after a
/// stream completes).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Usage,
    pub model: String,
}

/// Events emitted while a streaming response is in flight.
///
/// Only incremental text streams; tool calls are assembled internally and
/// arrive with the final [`ChatResponse`].
#[derive(Debug, Clone)]
pub enum StreamChunk {
    TextDelta { text: String },
}

/// Common interface for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response. Implementations
    /// must abort the underlying HTTP call when `cancel` fires.
    async fn chat(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError>;

    /// Stream a response: text deltas are sent through `tx` as produced and
    /// the assembled response is returned at the end.
    ///
    /// Default: falls back to a non-streaming call and emits the full text
    /// as one delta.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        let resp = self.chat(req, cancel).await?;
        if let Some(text) = &resp.content {
            if !text.is_empty() {
                let _ = tx.send(StreamChunk::TextDelta { text: text.clone() }).await;
            }
        }
        Ok(resp)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// No credentials for the configured model. The gateway starts anyway;
    /// every turn fails with this until credentials appear.
    #[error("provider not configured: {0}")]
    Configuration(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Placeholder provider wired when no API key is configured.
///
/// Keeps the gateway bootable: every call fails with
/// [`ProviderError::Configuration`] and the turn engine surfaces a short
/// unavailability message.
pub struct UnconfiguredProvider;

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn chat(
        &self,
        _req: &ChatRequest,
        _cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::Configuration(
            "no API key configured for the LLM provider".to_string(),
        ))
    }
}
