//! The agent turn engine: one inbound message in, one bounded reason-act
//! loop, one final assistant text out.
//!
//! Flow per iteration: assemble context → call LLM → if the response has
//! tool calls, execute them in order and feed results back → repeat. Stops
//! on a plain assistant response, the iteration cap, a provider failure, or
//! cancellation. The session is saved exactly once, at the end of the turn.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use huginn_bus::{MessageBus, OutboundMessage};
use huginn_core::config::AgentConfig;
use huginn_sessions::{ChatMessage, Session, SessionStore, ToolCallRequest};

use crate::compact::Compactor;
use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, StreamChunk};
use crate::telemetry::{TurnTelemetry, UsageSink};
use crate::tools::registry::ToolRegistry;

/// Synthetic final text when the loop exhausts its iterations.
pub const ITERATION_LIMIT_TEXT: &str = "iteration limit reached";

/// Short, non-sensitive user-visible failure strings.
const PROVIDER_FAILURE_TEXT: &str = "The model request failed. Please try again in a moment.";
const PROVIDER_UNCONFIGURED_TEXT: &str =
    "The assistant has no model credentials configured and cannot respond yet.";

/// Input to one turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_key: String,
    pub content: String,
    pub channel: String,
    pub chat_id: String,
}

impl TurnInput {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let channel = channel.into();
        let chat_id = chat_id.into();
        Self {
            session_key: format!("{channel}:{chat_id}"),
            content: content.into(),
            channel,
            chat_id,
        }
    }
}

/// What a finished turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    pub text: String,
    pub telemetry: TurnTelemetry,
}

/// Events emitted by the streaming variant.
///
/// Incremental text streams as it is produced; tool results do not stream,
/// only their start/end markers.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    TextDelta {
        text: String,
    },
    ToolStart {
        call_id: String,
        name: String,
        iteration: u32,
    },
    ToolEnd {
        call_id: String,
        name: String,
        success: bool,
        duration_ms: u64,
    },
    /// Iteration boundary.
    Status {
        iteration: u32,
    },
    /// Terminal event: the full final text plus the completed telemetry,
    /// so a pure event-stream consumer needs nothing else.
    Done {
        text: String,
        telemetry: TurnTelemetry,
    },
}

pub struct AgentTurnEngine {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    compactor: Compactor,
    usage: Option<Arc<UsageSink>>,
    bus: Option<Arc<MessageBus>>,
    config: AgentConfig,
    system_prompt: String,
    skills_prelude: Option<String>,
    memory_prelude: Option<String>,
}

impl AgentTurnEngine {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        config: AgentConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        let compactor = Compactor::new(provider.clone(), config.model.clone(), config.context_limit());
        Self {
            provider,
            tools,
            sessions,
            compactor,
            usage: None,
            bus: None,
            config,
            system_prompt: system_prompt.into(),
            skills_prelude: None,
            memory_prelude: None,
        }
    }

    /// Attach the bus for outbound publication.
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attach the usage sink for per-turn accounting.
    pub fn with_usage_sink(mut self, sink: Arc<UsageSink>) -> Self {
        self.usage = Some(sink);
        self
    }

    /// Attach skills/memory preludes folded into the system message.
    pub fn with_preludes(
        mut self,
        skills: Option<String>,
        memory: Option<String>,
    ) -> Self {
        self.skills_prelude = skills;
        self.memory_prelude = memory;
        self
    }

    /// Run a turn and publish the result through the bus.
    pub async fn run_turn(&self, input: TurnInput, cancel: &CancellationToken) -> TurnOutcome {
        self.run(input, None, true, cancel).await
    }

    /// Run a turn for a direct/synchronous caller: the text is returned,
    /// nothing is published.
    pub async fn run_direct(&self, input: TurnInput, cancel: &CancellationToken) -> TurnOutcome {
        self.run(input, None, false, cancel).await
    }

    /// Streaming variant: same state machine, events flushed to `events` as
    /// they happen, ending with [`TurnEvent::Done`]. Nothing is published —
    /// the event consumer owns delivery.
    pub async fn run_streaming(
        &self,
        input: TurnInput,
        events: mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        self.run(input, Some(&events), false, cancel).await
    }

    async fn run(
        &self,
        input: TurnInput,
        events: Option<&mpsc::Sender<TurnEvent>>,
        publish: bool,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut telemetry =
            TurnTelemetry::start(&input.channel, &input.session_key, &self.config.model);

        let mut session = match self.sessions.get_or_create(&input.session_key) {
            Ok(s) => s,
            Err(e) => {
                warn!(key = %input.session_key, error = %e, "session load failed, starting empty");
                Session::new(input.session_key.clone())
            }
        };

        session.push(ChatMessage::user(input.content.clone()));

        if self.compactor.compact(&mut session, cancel).await {
            telemetry.compactions += 1;
        }

        let mut final_text: Option<String> = None;
        let mut failure_text: Option<&'static str> = None;
        let mut failure_detail: Option<String> = None;
        let mut cancelled = false;

        for iteration in 1..=self.config.max_tool_iterations {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            emit(events, TurnEvent::Status { iteration }).await;

            let messages = crate::context::build_context(
                &session,
                &self.system_prompt,
                self.skills_prelude.as_deref(),
                self.memory_prelude.as_deref(),
                self.config.max_session_messages,
            );
            let req = ChatRequest {
                model: self.config.model.clone(),
                messages,
                tools: self.tools.definitions(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };

            let started = Instant::now();
            let result = self.call_provider(&req, events, cancel).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let resp = match result {
                Ok(r) => r,
                Err(ProviderError::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e @ ProviderError::Configuration(_)) => {
                    failure_text = Some(PROVIDER_UNCONFIGURED_TEXT);
                    failure_detail = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!(error = %e, iteration, "LLM call failed");
                    failure_text = Some(PROVIDER_FAILURE_TEXT);
                    failure_detail = Some(e.to_string());
                    break;
                }
            };

            telemetry.record_llm_call(iteration, resp.usage, duration_ms, &resp.finish_reason);

            if resp.tool_calls.is_empty() {
                let text = resp.content.unwrap_or_default();
                session.push(ChatMessage::assistant(text.clone()));
                final_text = Some(text);
                break;
            }

            // Announce the tool calls in the session before executing any.
            let requests: Vec<ToolCallRequest> = resp
                .tool_calls
                .iter()
                .map(|c| ToolCallRequest {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c.arguments.clone(),
                })
                .collect();
            session.push(ChatMessage::assistant_with_tools(
                resp.content.unwrap_or_default(),
                requests,
            ));

            for call in &resp.tool_calls {
                emit(
                    events,
                    TurnEvent::ToolStart {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        iteration,
                    },
                )
                .await;

                let tool_started = Instant::now();
                let result = self.tools.invoke(&call.name, call.arguments.clone()).await;
                let tool_duration_ms = tool_started.elapsed().as_millis() as u64;

                session.push(ChatMessage::tool(call.id.clone(), result.content.clone()));
                telemetry.record_tool_call(
                    iteration,
                    &call.id,
                    &call.name,
                    !result.is_error,
                    tool_duration_ms,
                    result.content.len(),
                    result.is_error.then(|| result.content.clone()),
                );

                emit(
                    events,
                    TurnEvent::ToolEnd {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        success: !result.is_error,
                        duration_ms: tool_duration_ms,
                    },
                )
                .await;
            }
        }

        let (text, success) = if cancelled {
            // Nothing partial is appended; the user message still persists.
            telemetry.complete(false, Some("cancelled".to_string()));
            (String::new(), false)
        } else if let Some(short) = failure_text {
            telemetry.complete(false, failure_detail);
            (short.to_string(), false)
        } else if let Some(text) = final_text {
            telemetry.complete(true, None);
            (text, true)
        } else {
            // Ran out of iterations: terminate with a synthetic assistant so
            // the session never ends on a hanging tool message.
            session.push(ChatMessage::assistant(ITERATION_LIMIT_TEXT));
            telemetry.truncated = true;
            telemetry.complete(true, None);
            (ITERATION_LIMIT_TEXT.to_string(), true)
        };

        if let Err(e) = self.sessions.save(&mut session) {
            warn!(key = %session.key, error = %e, "session save failed");
        }

        if let Some(sink) = &self.usage {
            if let Err(e) = sink.record(&telemetry) {
                warn!(error = %e, "usage record failed");
            }
        }

        if publish && !cancelled && !text.is_empty() {
            if let Some(bus) = &self.bus {
                let outbound =
                    OutboundMessage::new(input.channel.clone(), input.chat_id.clone(), text.clone());
                if let Err(e) = bus.publish_outbound(outbound) {
                    warn!(error = %e, "outbound publish failed");
                }
            }
        }

        emit(
            events,
            TurnEvent::Done {
                text: text.clone(),
                telemetry: telemetry.clone(),
            },
        )
        .await;

        info!(
            session = %input.session_key,
            iterations = telemetry.iterations,
            tool_calls = telemetry.total_tool_calls(),
            success,
            "turn complete"
        );

        TurnOutcome { text, telemetry }
    }

    /// One LLM call, streamed when an event channel is attached.
    async fn call_provider(
        &self,
        req: &ChatRequest,
        events: Option<&mpsc::Sender<TurnEvent>>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        match events {
            Some(tx) => {
                let (delta_tx, mut delta_rx) = mpsc::channel::<StreamChunk>(32);
                let forward_tx = tx.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(StreamChunk::TextDelta { text }) = delta_rx.recv().await {
                        if forward_tx.send(TurnEvent::TextDelta { text }).await.is_err() {
                            break;
                        }
                    }
                });
                let result = self.provider.chat_stream(req, delta_tx, cancel).await;
                let _ = forwarder.await;
                result
            }
            None => self.provider.chat(req, cancel).await,
        }
    }
}

async fn emit(events: Option<&mpsc::Sender<TurnEvent>>, event: TurnEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
