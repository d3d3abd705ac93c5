use multitab_broadcast::channel::BroadcastChannelError;
use thiserror::Error;

/// An error that can occur when using an open channel.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The channel handle has been closed.
    #[error("channel '{0}' is closed")]
    Closed(String),
}

impl BroadcastChannelError for Error {}
