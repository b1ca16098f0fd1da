use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a media asset.
///
/// Happy path: Received → Validated → Materialized → Processed. Side states
/// (Quarantined, Rejected, Failed) are terminal before Expired; Expired is
/// terminal outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Received,
    Validated,
    Materialized,
    Processed,
    Quarantined,
    Rejected,
    Failed,
    Expired,
}

impl AssetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetState::Received => "received",
            AssetState::Validated => "validated",
            AssetState::Materialized => "materialized",
            AssetState::Processed => "processed",
            AssetState::Quarantined => "quarantined",
            AssetState::Rejected => "rejected",
            AssetState::Failed => "failed",
            AssetState::Expired => "expired",
        }
    }
}

/// Verdict of the policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Quarantine,
    Reject,
}

impl PolicyDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::Quarantine => "quarantine",
            PolicyDecision::Reject => "reject",
        }
    }
}

/// A registered media asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: String,
    pub channel: String,
    pub chat_id: String,
    pub mime_type: String,
    pub file_name: String,
    pub size_bytes: u64,
    /// Where the bytes came from (e.g. "upload", "url").
    pub source_type: String,
    /// Transport-native reference to the source.
    pub source_ref: String,
    /// Path on local disk once materialized.
    pub local_path: Option<String>,
    pub state: AssetState,
    pub policy_decision: PolicyDecision,
    pub policy_reason: Option<String>,
    /// Set when `state == Failed`.
    pub failure_code: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub expires_at_utc: DateTime<Utc>,
    /// Processor results and transport extras.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Input to [`crate::MediaPipeline::register_inbound`].
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub channel: String,
    pub chat_id: String,
    pub mime_type: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub source_type: String,
    pub source_ref: String,
    pub local_path: Option<String>,
    /// How many attachments the originating message carried in total.
    pub item_count_in_message: usize,
}

impl RegisterRequest {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            mime_type: mime_type.into(),
            file_name: String::new(),
            size_bytes,
            source_type: "upload".to_string(),
            source_ref: String::new(),
            local_path: None,
            item_count_in_message: 1,
        }
    }
}

/// Kind tag of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Received,
    Policy,
    State,
    Processor,
    Failure,
    Expired,
}

/// One entry in an asset's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    pub actor: String,
    pub message: String,
}

impl AuditEvent {
    pub fn now(kind: AuditKind, actor: &str, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            actor: actor.to_string(),
            message: message.into(),
        }
    }
}
