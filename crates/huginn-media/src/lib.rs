pub mod error;
pub mod pipeline;
pub mod policy;
pub mod types;

pub use error::MediaError;
pub use pipeline::{MediaPipeline, MediaProcessor, MediaStats};
pub use types::{AssetState, AuditEvent, AuditKind, MediaAsset, PolicyDecision, RegisterRequest};
