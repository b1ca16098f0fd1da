//! Context assembly: the message list sent to the LLM for one iteration.

use huginn_sessions::{ChatMessage, Role, Session};

/// Rough chars-per-token ratio used for budgeting.
const CHARS_PER_TOKEN: usize = 4;
/// Fixed overhead charged per message (role, framing).
const PER_MESSAGE_OVERHEAD: u32 = 4;

/// Assemble the context for an LLM call.
///
/// Layout: one combined system message (prompt + skills + memory preludes),
/// then the last `max_session_messages` history entries with role and order
/// preserved. Stored `system` messages are skipped — the fresh system prompt
/// replaces them. A `tool` message whose announcing assistant fell outside
/// the window (or never existed) is dropped here rather than sent to the
/// provider.
pub fn build_context(
    session: &Session,
    system_prompt: &str,
    skills_prelude: Option<&str>,
    memory_prelude: Option<&str>,
    max_session_messages: usize,
) -> Vec<ChatMessage> {
    let mut combined = system_prompt.to_string();
    for prelude in [skills_prelude, memory_prelude].into_iter().flatten() {
        if !prelude.is_empty() {
            combined.push_str("\n\n");
            combined.push_str(prelude);
        }
    }

    let mut messages = vec![ChatMessage::system(combined)];

    let history = &session.messages;
    let start = history.len().saturating_sub(max_session_messages);

    let mut open_calls: Vec<String> = Vec::new();
    for msg in &history[start..] {
        match msg.role {
            Role::System => continue,
            Role::Assistant => {
                open_calls = msg.tool_calls.iter().map(|c| c.id.clone()).collect();
            }
            Role::Tool => {
                let anchored = msg
                    .tool_call_id
                    .as_deref()
                    .map(|id| open_calls.iter().any(|c| c == id))
                    .unwrap_or(false);
                if !anchored {
                    continue;
                }
            }
            Role::User => {
                open_calls.clear();
            }
        }
        messages.push(msg.clone());
    }

    messages
}

/// Per-role token approximation: ~4 chars/token plus a small per-message
/// overhead, counting serialized tool calls too.
pub fn estimate_tokens(messages: &[ChatMessage]) -> u32 {
    messages
        .iter()
        .map(|m| {
            let mut chars = m.content.len();
            for call in &m.tool_calls {
                chars += call.name.len() + call.arguments.to_string().len();
            }
            (chars / CHARS_PER_TOKEN) as u32 + PER_MESSAGE_OVERHEAD
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use huginn_sessions::ToolCallRequest;

    fn session_with(messages: Vec<ChatMessage>) -> Session {
        let mut s = Session::new("web:test");
        s.messages = messages;
        s
    }

    #[test]
    fn system_message_combines_preludes() {
        let session = session_with(vec![ChatMessage::user("hi")]);
        let ctx = build_context(&session, "base", Some("skills"), Some("memory"), 10);
        assert_eq!(ctx[0].role, Role::System);
        assert_eq!(ctx[0].content, "base\n\nskills\n\nmemory");
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn window_keeps_only_recent_messages() {
        let mut messages = Vec::new();
        for i in 0..10 {
            messages.push(ChatMessage::user(format!("m{i}")));
        }
        let session = session_with(messages);
        let ctx = build_context(&session, "sys", None, None, 3);
        assert_eq!(ctx.len(), 4);
        assert_eq!(ctx[1].content, "m7");
        assert_eq!(ctx[3].content, "m9");
    }

    #[test]
    fn stored_system_messages_are_replaced_by_fresh_prompt() {
        let session = session_with(vec![
            ChatMessage::system("stale compaction head"),
            ChatMessage::user("hi"),
        ]);
        let ctx = build_context(&session, "fresh", None, None, 10);
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].content, "fresh");
        assert_eq!(ctx[1].content, "hi");
    }

    #[test]
    fn orphaned_tool_message_is_dropped() {
        // The window cuts between the assistant and its tool result.
        let mut messages = vec![ChatMessage::assistant_with_tools(
            "",
            vec![ToolCallRequest {
                id: "c1".into(),
                name: "calculator".into(),
                arguments: serde_json::json!({}),
            }],
        )];
        messages.push(ChatMessage::tool("c1", "5"));
        messages.push(ChatMessage::user("next"));
        let session = session_with(messages);

        // Window of 2: only the tool result and the user message survive the
        // cut, and the orphaned tool result must be dropped.
        let ctx = build_context(&session, "sys", None, None, 2);
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[1].content, "next");
    }

    #[test]
    fn anchored_tool_message_survives() {
        let messages = vec![
            ChatMessage::assistant_with_tools(
                "",
                vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "calculator".into(),
                    arguments: serde_json::json!({}),
                }],
            ),
            ChatMessage::tool("c1", "5"),
        ];
        let session = session_with(messages);
        let ctx = build_context(&session, "sys", None, None, 10);
        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx[2].role, Role::Tool);
    }

    #[test]
    fn estimate_scales_with_content_length() {
        let short = vec![ChatMessage::user("hi")];
        let long = vec![ChatMessage::user("x".repeat(4000))];
        assert!(estimate_tokens(&long) > estimate_tokens(&short));
        assert!(estimate_tokens(&long) >= 1000);
    }

    #[test]
    fn empty_history_is_valid() {
        let session = session_with(Vec::new());
        let ctx = build_context(&session, "sys", None, None, 10);
        assert_eq!(ctx.len(), 1);
    }
}
