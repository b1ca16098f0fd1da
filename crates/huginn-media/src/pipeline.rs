use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use huginn_core::config::MediaConfig;

use crate::error::MediaError;
use crate::policy;
use crate::types::{
    AssetState, AuditEvent, AuditKind, MediaAsset, PolicyDecision, RegisterRequest,
};

/// A processing stage (OCR, transcription, …).
///
/// Implementations are registered by the host; the pipeline runs every
/// processor whose `applies_to` matches an allowed, materialized asset.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    fn name(&self) -> &str;
    fn applies_to(&self, mime_type: &str) -> bool;
    /// Returns metadata entries merged into the asset on success.
    async fn process(
        &self,
        asset: &MediaAsset,
    ) -> Result<serde_json::Map<String, serde_json::Value>, MediaError>;
}

/// Totals returned by [`MediaPipeline::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct MediaStats {
    pub total: usize,
    pub by_state: HashMap<String, usize>,
    pub by_decision: HashMap<String, usize>,
}

/// Asset registry with policy gate, lifecycle state machine, and audit trail.
///
/// Assets are in-memory and TTL-bounded; only their audit trail survives
/// [`MediaPipeline::cleanup_expired`].
pub struct MediaPipeline {
    config: MediaConfig,
    processor_timeout: Duration,
    assets: DashMap<String, MediaAsset>,
    audits: DashMap<String, Vec<AuditEvent>>,
    processors: Vec<Arc<dyn MediaProcessor>>,
}

impl MediaPipeline {
    pub fn new(config: MediaConfig) -> Self {
        let processor_timeout = Duration::from_secs(config.processor_timeout_secs);
        Self {
            config,
            processor_timeout,
            assets: DashMap::new(),
            audits: DashMap::new(),
            processors: Vec::new(),
        }
    }

    /// Register a processing stage. Order of registration is run order.
    pub fn add_processor(&mut self, processor: Arc<dyn MediaProcessor>) {
        self.processors.push(processor);
    }

    /// Override the per-stage deadline (tests, hosts with fast processors).
    pub fn with_processor_timeout(mut self, timeout: Duration) -> Self {
        self.processor_timeout = timeout;
        self
    }

    /// Run an inbound asset through the full pipeline: policy gate, initial
    /// state, applicable processors, audit trail.
    #[instrument(skip(self, req), fields(channel = %req.channel, mime = %req.mime_type))]
    pub async fn register_inbound(&self, req: RegisterRequest, actor: &str) -> MediaAsset {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let (decision, reason) = policy::evaluate(&self.config, &req);

        let state = match decision {
            PolicyDecision::Reject => AssetState::Rejected,
            PolicyDecision::Quarantine => AssetState::Quarantined,
            PolicyDecision::Allow if req.local_path.is_none() => AssetState::Validated,
            PolicyDecision::Allow => AssetState::Materialized,
        };

        let mut asset = MediaAsset {
            id: id.clone(),
            channel: req.channel,
            chat_id: req.chat_id,
            mime_type: req.mime_type,
            file_name: req.file_name,
            size_bytes: req.size_bytes,
            source_type: req.source_type,
            source_ref: req.source_ref,
            local_path: req.local_path,
            state,
            policy_decision: decision,
            policy_reason: reason.clone(),
            failure_code: None,
            created_at_utc: now,
            expires_at_utc: now + ChronoDuration::minutes(self.config.temp_ttl_minutes),
            metadata: serde_json::Map::new(),
        };

        self.audit(&id, AuditKind::Received, actor, format!(
            "asset received ({} bytes, {})",
            asset.size_bytes, asset.mime_type
        ));
        self.audit(&id, AuditKind::Policy, actor, match &reason {
            Some(r) => format!("decision={} ({})", decision.as_str(), r),
            None => format!("decision={}", decision.as_str()),
        });
        self.audit(&id, AuditKind::State, actor, format!("state={}", state.as_str()));

        if decision == PolicyDecision::Allow && asset.state == AssetState::Materialized {
            self.run_processors(&mut asset, actor).await;
        }

        info!(
            asset_id = %asset.id,
            decision = decision.as_str(),
            state = asset.state.as_str(),
            "asset registered"
        );
        self.assets.insert(id, asset.clone());
        asset
    }

    pub fn get_by_id(&self, id: &str) -> Option<MediaAsset> {
        self.assets.get(id).map(|a| a.clone())
    }

    /// Most recently created assets first. `limit` is clamped to 1..=1000.
    pub fn list_recent(&self, limit: usize) -> Vec<MediaAsset> {
        let limit = limit.clamp(1, 1000);
        let mut all: Vec<MediaAsset> = self.assets.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| b.created_at_utc.cmp(&a.created_at_utc));
        all.truncate(limit);
        all
    }

    /// The ordered audit trail for an asset. Empty when auditing is off or
    /// the id is unknown.
    pub fn get_audit(&self, id: &str) -> Vec<AuditEvent> {
        self.audits.get(id).map(|v| v.clone()).unwrap_or_default()
    }

    /// Drop every asset whose TTL has elapsed, emitting an `expired` audit
    /// for each. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .assets
            .iter()
            .filter(|e| e.expires_at_utc <= now)
            .map(|e| e.id.clone())
            .collect();

        for id in &expired {
            if let Some((_, mut asset)) = self.assets.remove(id) {
                asset.state = AssetState::Expired;
                self.audit(id, AuditKind::Expired, "system", "asset expired and removed");
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired assets cleaned up");
        }
        expired.len()
    }

    /// Totals by state and by policy decision over the live registry.
    pub fn get_stats(&self) -> MediaStats {
        let mut by_state: HashMap<String, usize> = HashMap::new();
        let mut by_decision: HashMap<String, usize> = HashMap::new();
        for asset in self.assets.iter() {
            *by_state.entry(asset.state.as_str().to_string()).or_default() += 1;
            *by_decision
                .entry(asset.policy_decision.as_str().to_string())
                .or_default() += 1;
        }
        MediaStats {
            total: self.assets.len(),
            by_state,
            by_decision,
        }
    }

    // --- private helpers ---------------------------------------------------

    async fn run_processors(&self, asset: &mut MediaAsset, actor: &str) {
        for processor in &self.processors {
            if !processor.applies_to(&asset.mime_type) {
                continue;
            }

            let outcome = tokio::time::timeout(self.processor_timeout, processor.process(asset)).await;

            match outcome {
                Ok(Ok(extra)) => {
                    for (k, v) in extra {
                        asset.metadata.insert(k, v);
                    }
                    self.audit(&asset.id, AuditKind::Processor, actor, format!(
                        "{} completed",
                        processor.name()
                    ));
                }
                Ok(Err(e)) => {
                    warn!(asset_id = %asset.id, processor = processor.name(), error = %e, "processor failed");
                    asset.state = AssetState::Failed;
                    asset.failure_code = Some(e.code().to_string());
                    self.audit(&asset.id, AuditKind::Failure, actor, format!(
                        "{} failed: {}",
                        processor.name(),
                        e.code()
                    ));
                    self.audit(&asset.id, AuditKind::State, actor, "state=failed");
                    return;
                }
                Err(_) => {
                    warn!(asset_id = %asset.id, processor = processor.name(), "processor timed out");
                    asset.state = AssetState::Failed;
                    asset.failure_code = Some(MediaError::Timeout.code().to_string());
                    self.audit(&asset.id, AuditKind::Failure, actor, format!(
                        "{} timed out",
                        processor.name()
                    ));
                    self.audit(&asset.id, AuditKind::State, actor, "state=failed");
                    return;
                }
            }
        }

        asset.state = AssetState::Processed;
        self.audit(&asset.id, AuditKind::State, actor, "state=processed");
    }

    fn audit(&self, id: &str, kind: AuditKind, actor: &str, message: impl Into<String>) {
        if !self.config.audit_events {
            return;
        }
        self.audits
            .entry(id.to_string())
            .or_default()
            .push(AuditEvent::now(kind, actor, message));
    }
}
