use serde::{Deserialize, Serialize};

/// Conversation role, mirroring the LLM wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A tool invocation announced by an assistant message.
///
/// The `id` round-trips through the provider so a later `tool` message can
/// be matched back to this request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// RFC3339 timestamp.
    pub timestamp: String,
    /// Tool calls announced by this message (assistant only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// For `tool` messages: the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn stamped(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::stamped(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::stamped(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::stamped(Role::Assistant, content)
    }

    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        let mut msg = Self::stamped(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::stamped(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg
    }
}

/// A conversation session keyed by `channel:chat_id`.
///
/// Lazily created on first access; mutated in memory during a turn; saved
/// atomically at end of turn. Message order is insertion order and matches
/// database order after every save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    /// RFC3339 creation timestamp.
    pub created_at: String,
    /// RFC3339 timestamp of the last save. Always ≥ `created_at`.
    pub updated_at: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    /// A fresh, not-yet-persisted session.
    pub fn new(key: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            key: key.into(),
            created_at: now.clone(),
            updated_at: now,
            messages: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn push(&mut self, msg: ChatMessage) {
        self.messages.push(msg);
    }

    /// Validate the tool-follows-assistant invariant over the whole history:
    /// every `tool` message must directly follow an `assistant` message (or
    /// another `tool` message of the same batch) that announced its call id.
    pub fn tool_messages_are_anchored(&self) -> bool {
        let mut open_calls: Vec<String> = Vec::new();
        for msg in &self.messages {
            match msg.role {
                Role::Assistant => {
                    open_calls = msg.tool_calls.iter().map(|c| c.id.clone()).collect();
                }
                Role::Tool => {
                    let Some(id) = msg.tool_call_id.as_deref() else {
                        return false;
                    };
                    let Some(pos) = open_calls.iter().position(|c| c == id) else {
                        return false;
                    };
                    open_calls.remove(pos);
                }
                _ => {
                    open_calls.clear();
                }
            }
        }
        true
    }
}

/// Listing row: session metadata plus its message count.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub key: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: u32,
}
