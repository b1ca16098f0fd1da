pub mod bus;
pub mod error;
pub mod transport;
pub mod types;

pub use bus::MessageBus;
pub use error::BusError;
pub use transport::{Subscriber, Transport};
pub use types::{InboundMessage, OutboundMessage};
