//! `huginn-agent` — the reason-act core: LLM provider contract, tool
//! registry, context assembly, compaction, and the turn engine.

pub mod compact;
pub mod context;
pub mod engine;
pub mod openai;
pub mod provider;
pub mod telemetry;
pub mod tools;

pub use compact::Compactor;
pub use engine::{AgentTurnEngine, TurnEvent, TurnInput, TurnOutcome};
pub use openai::OpenAiProvider;
pub use provider::{
    ChatRequest, ChatResponse, LlmProvider, ProviderError, StreamChunk, ToolCall, ToolDefinition,
    UnconfiguredProvider, Usage,
};
pub use telemetry::{TurnTelemetry, UsageSink};
pub use tools::{registry::ToolRegistry, Tool, ToolResult};
