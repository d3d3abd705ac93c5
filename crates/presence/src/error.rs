use multitab_broadcast::handler::BroadcastHandlerError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A payload could not be encoded or decoded as a presence message.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BroadcastHandlerError for Error {}

/// Result type for presence operations.
pub type Result<T> = std::result::Result<T, Error>;
