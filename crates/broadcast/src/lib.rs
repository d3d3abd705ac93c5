//! Abstract interface for same-origin broadcast channels.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Channels are named, origin-scoped publish/subscribe buses.
pub mod channel;

/// Handlers process payloads delivered by channels.
pub mod handler;

/// Transports open channels and report whether broadcasting is available.
pub mod transport;
