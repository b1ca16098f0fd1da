use thiserror::Error;

/// Errors that can occur on the message bus or in a transport adapter.
#[derive(Debug, Error)]
pub enum BusError {
    /// Publish after shutdown. Fatal for the publisher.
    #[error("bus is closed")]
    Closed,

    /// A subscriber failed to deliver a message to its transport.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// The transport rejected the supplied credentials or token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The transport-specific configuration is invalid or missing.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
