use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use huginn_core::SessionKey;

/// A message received from an external transport (Telegram, Slack, web, …).
///
/// Immutable once constructed: produced by a transport adapter, consumed
/// exactly once by the inbound dispatcher. The content is persisted through
/// the session, never as an `InboundMessage` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Logical channel name (e.g. "telegram", "web").
    pub channel: String,

    /// Platform-native identifier for the sender.
    pub sender_id: String,

    /// Platform-native identifier for the chat/conversation.
    pub chat_id: String,

    /// Plain text content. Transports must deliver UTF-8.
    pub content: String,

    /// When the message was received.
    pub timestamp: DateTime<Utc>,

    /// Local file paths of attachments, in arrival order.
    #[serde(default)]
    pub media: Vec<String>,

    /// Transport-specific extras.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Derived serialization key: `channel:chat_id`.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.channel, &self.chat_id)
    }
}

/// A message to be delivered back through a transport.
///
/// Produced by the turn engine or a cron job; consumed by the subscribers
/// registered for `channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,

    /// Local file paths of attachments to send along.
    #[serde(default)]
    pub media: Vec<String>,

    /// Platform message id this is a reply to, when the transport supports it.
    pub reply_to: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            reply_to: None,
            metadata: serde_json::Map::new(),
        }
    }
}
