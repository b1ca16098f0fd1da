pub mod allow;
pub mod config;
pub mod error;
pub mod types;

pub use config::HuginnConfig;
pub use error::{CoreError, Result};
pub use types::SessionKey;
