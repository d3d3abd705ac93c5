use multitab_broadcast::transport::BroadcastTransportError;
use thiserror::Error;

/// An error that can occur when opening channels.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The channel name is invalid.
    #[error("invalid channel name - must not be empty")]
    InvalidChannelName,

    /// Broadcasting is not available on this transport.
    #[error("broadcast channels are not supported")]
    Unsupported,
}

impl BroadcastTransportError for Error {}
