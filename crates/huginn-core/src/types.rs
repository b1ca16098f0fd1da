use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical session identifier: `channel:chat_id`.
///
/// The session key is the serialization unit — turns for the same key are
/// totally ordered, turns for different keys run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(channel: &str, chat_id: &str) -> Self {
        Self(format!("{}:{}", channel, chat_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split back into `(channel, chat_id)`. The chat id may itself contain
    /// colons; only the first one separates the channel.
    pub fn parts(&self) -> (&str, &str) {
        match self.0.split_once(':') {
            Some((channel, chat)) => (channel, chat),
            None => (self.0.as_str(), ""),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_channel_and_chat() {
        let key = SessionKey::new("telegram", "12345");
        assert_eq!(key.as_str(), "telegram:12345");
    }

    #[test]
    fn parts_split_on_first_colon_only() {
        let key = SessionKey::new("web", "room:7");
        assert_eq!(key.parts(), ("web", "room:7"));
    }

    #[test]
    fn parts_without_separator_yield_empty_chat() {
        let key = SessionKey::from("heartbeat");
        assert_eq!(key.parts(), ("heartbeat", ""));
    }
}
