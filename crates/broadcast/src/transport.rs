use crate::channel::BroadcastChannel;

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for transport errors
pub trait BroadcastTransportError: Debug + Error + Send + Sync + 'static {}

/// A source of broadcast channels scoped to a single origin.
#[async_trait]
pub trait BroadcastTransport
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the transport.
    type Error: BroadcastTransportError;

    /// The channel type opened by this transport.
    type Channel: BroadcastChannel;

    /// Whether the underlying broadcast primitive exists at all.
    fn is_supported(&self) -> bool;

    /// Opens a handle on the channel with the given name.
    async fn open<K>(&self, channel_name: K) -> Result<Self::Channel, Self::Error>
    where
        K: Clone + Into<String> + Send;
}
