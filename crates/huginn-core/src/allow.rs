//! Sender allowlist enforcement, shared by all transport adapters.
//!
//! Deny-by-default: an empty list means no one is allowed. Wildcard `"*"`
//! allows everyone. Entries may include or omit a leading `@`.

/// Returns `true` when the given sender is permitted to originate inbound
/// messages on a transport.
///
/// Matching rules (case-sensitive):
/// - `"*"` — allow everyone
/// - `"@name"` or `"name"` — match by display name (without `@`)
/// - `"123456789"` — match by platform-native sender id
///
/// An empty `allow_from` slice always returns `false`.
pub fn is_allowed(allow_from: &[String], sender_name: &str, sender_id: &str) -> bool {
    if allow_from.is_empty() {
        return false;
    }
    allow_from.iter().any(|entry| {
        let entry = entry.trim_start_matches('@');
        entry == "*" || entry == sender_name || entry == sender_id
    })
}
