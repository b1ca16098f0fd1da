use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{bus::MessageBus, error::BusError, types::OutboundMessage};

/// Per-channel outbound handler.
///
/// A transport registers one (or more) of these via
/// [`MessageBus::subscribe_outbound`]; the dispatcher invokes them in
/// registration order for every message published to the channel.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn deliver(&self, msg: &OutboundMessage) -> Result<(), BusError>;
}

/// Common interface implemented by every transport adapter.
///
/// The bus contract: `run` publishes an [`crate::InboundMessage`] for every
/// received message whose sender passes the allowlist, and the adapter
/// subscribes to outbound for its channel name before `run` starts reading.
/// Adapters hold an `Arc<MessageBus>` handle — they send and subscribe but
/// do not own the bus. Lifecycle is reported to the logger, not the bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable lowercase channel name (e.g. `"telegram"`). Must be unique
    /// across all attached transports.
    fn name(&self) -> &str;

    /// Read loop: runs until cancellation fires.
    async fn run(&self, bus: Arc<MessageBus>, cancel: CancellationToken) -> Result<(), BusError>;
}
