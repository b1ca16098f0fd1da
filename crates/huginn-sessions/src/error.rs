use thiserror::Error;

/// Errors that can occur during session operations.
///
/// Load and save failures are logged warnings at the call sites — a turn
/// proceeds with whatever state is in cache; they are not fatal.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
