//! The media policy gate.
//!
//! Evaluation order is fixed: pipeline disabled → allow; too many items →
//! reject; oversized → reject (strict) or quarantine; allowed MIME → allow;
//! unknown MIME → quarantine (strict) or allow.

use huginn_core::config::MediaConfig;

use crate::types::{PolicyDecision, RegisterRequest};

/// Evaluate the policy gate for one inbound asset.
///
/// Returns the decision plus a human-readable reason for everything except
/// a plain allow.
pub fn evaluate(config: &MediaConfig, req: &RegisterRequest) -> (PolicyDecision, Option<String>) {
    if !config.enabled {
        return (PolicyDecision::Allow, Some("pipeline disabled".to_string()));
    }

    if req.item_count_in_message > config.max_items_per_message {
        return (
            PolicyDecision::Reject,
            Some(format!(
                "message carries {} items, limit is {}",
                req.item_count_in_message, config.max_items_per_message
            )),
        );
    }

    // A size exactly at the limit is allowed.
    if req.size_bytes > config.max_bytes_per_item {
        let reason = format!(
            "{} bytes exceeds limit of {}",
            req.size_bytes, config.max_bytes_per_item
        );
        return if config.reject_over_limit {
            (PolicyDecision::Reject, Some(reason))
        } else {
            (PolicyDecision::Quarantine, Some(reason))
        };
    }

    if mime_allowed(&config.allowed_mime_types, &req.mime_type) {
        return (PolicyDecision::Allow, None);
    }

    if config.quarantine_unknown_mime {
        (
            PolicyDecision::Quarantine,
            Some(format!("mime type not allowlisted: {}", req.mime_type)),
        )
    } else {
        (PolicyDecision::Allow, None)
    }
}

/// Allowlist entries ending in `/` are prefix matches (`image/`), everything
/// else is exact.
pub fn mime_allowed(allowlist: &[String], mime: &str) -> bool {
    allowlist.iter().any(|entry| {
        if entry.ends_with('/') {
            mime.starts_with(entry.as_str())
        } else {
            entry == mime
        }
    })
}
