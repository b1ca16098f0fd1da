//! Token-budget-driven history compaction.
//!
//! When a session's estimated tokens exceed 80% of the model's context
//! window, the middle of the history is replaced by a single synthesized
//! summary message while a recent tail stays verbatim. On summary failure
//! the middle is dropped without one — losing detail beats failing the turn.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use huginn_sessions::{ChatMessage, Role, Session};

use crate::context::estimate_tokens;
use crate::provider::{ChatRequest, LlmProvider};

/// Compaction triggers above this fraction of the context limit.
const TRIGGER_FRACTION: f64 = 0.80;
/// The kept tail is sized to land below this fraction.
const TAIL_FRACTION: f64 = 0.50;
/// Always keep at least this many recent messages verbatim.
const MIN_TAIL_MESSAGES: usize = 8;

const SUMMARY_SYSTEM_PROMPT: &str = "You are a conversation summarizer. Condense the \
conversation transcript you are given into a compact summary that preserves: stated \
facts about the user, decisions made, unresolved questions, and anything the \
assistant promised to do. Write plain prose. Do not add commentary.";

pub struct Compactor {
    provider: Arc<dyn LlmProvider>,
    model: String,
    context_limit: u32,
}

impl Compactor {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, context_limit: u32) -> Self {
        Self {
            provider,
            model: model.into(),
            context_limit,
        }
    }

    pub fn threshold(&self) -> u32 {
        (self.context_limit as f64 * TRIGGER_FRACTION) as u32
    }

    /// Compact the session in place when over threshold.
    ///
    /// Returns whether anything changed. Compacting an already-compact
    /// session is a no-op.
    pub async fn compact(&self, session: &mut Session, cancel: &CancellationToken) -> bool {
        let estimate = estimate_tokens(&session.messages);
        if estimate <= self.threshold() {
            return false;
        }

        // Preserve a leading system message as a safety net.
        let head: Vec<ChatMessage> = session
            .messages
            .first()
            .filter(|m| m.role == Role::System)
            .cloned()
            .into_iter()
            .collect();

        let tail_start = self.pick_tail_start(&session.messages, head.len());
        if tail_start <= head.len() {
            // Nothing in the middle to fold away.
            return false;
        }

        let middle: Vec<ChatMessage> = session.messages[head.len()..tail_start].to_vec();
        let tail: Vec<ChatMessage> = session.messages[tail_start..].to_vec();

        info!(
            session = %session.key,
            estimated_tokens = estimate,
            folded = middle.len(),
            kept = tail.len(),
            "compacting session history"
        );

        let summary = self.summarize(&middle, cancel).await;

        let mut rebuilt = head;
        match summary {
            Some(text) => rebuilt.push(ChatMessage::user(format!(
                "[Summary of {} earlier messages]\n{}",
                middle.len(),
                text
            ))),
            None => {
                warn!(session = %session.key, "summary synthesis failed, dropping folded range");
            }
        }
        rebuilt.extend(tail);
        session.messages = rebuilt;
        true
    }

    /// Find the index where the verbatim tail begins: walk backwards
    /// accumulating tokens until the tail budget is reached, keeping at
    /// least [`MIN_TAIL_MESSAGES`]. Leading tool results are then pushed
    /// into the folded range so the tail never opens with an orphan.
    fn pick_tail_start(&self, messages: &[ChatMessage], head_len: usize) -> usize {
        let tail_budget = (self.context_limit as f64 * TAIL_FRACTION) as u32;

        let mut start = messages.len();
        let mut used: u32 = 0;
        while start > head_len {
            let candidate = &messages[start - 1];
            let cost = estimate_tokens(std::slice::from_ref(candidate));
            let kept = messages.len() - start;
            if kept >= MIN_TAIL_MESSAGES && used + cost > tail_budget {
                break;
            }
            used += cost;
            start -= 1;
        }

        while start < messages.len() && messages[start].role == Role::Tool {
            start += 1;
        }
        start
    }

    async fn summarize(
        &self,
        middle: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Option<String> {
        let transcript: String = middle
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
                ChatMessage::user(format!("Summarize this conversation:\n\n{transcript}")),
            ],
            tools: Vec::new(),
            max_tokens: 1024,
            temperature: 0.2,
        };

        match self.provider.chat(&req, cancel).await {
            Ok(resp) => resp.content.filter(|c| !c.trim().is_empty()),
            Err(e) => {
                warn!(error = %e, "compaction summary call failed");
                None
            }
        }
    }
}
