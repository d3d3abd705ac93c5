use crate::handler::BroadcastHandler;

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for channel errors
pub trait BroadcastChannelError: Debug + Error + Send + Sync + 'static {}

/// An open handle on a named broadcast channel.
///
/// Every handle opened on the same origin and channel name receives what the
/// other handles publish. Delivery is best effort: there is no acknowledgement,
/// and ordering is only preserved per publishing handle.
#[async_trait]
pub trait BroadcastChannel
where
    Self: Debug + Send + Sync + 'static,
{
    /// The error type for the channel.
    type Error: BroadcastChannelError;

    /// The channel name this handle was opened with.
    fn name(&self) -> &str;

    /// Publish a payload to every other handle open on the channel.
    async fn publish(&self, payload: Bytes) -> Result<(), Self::Error>;

    /// Deliver every payload published by other handles to `handler`.
    async fn subscribe<X>(&self, handler: X) -> Result<(), Self::Error>
    where
        X: BroadcastHandler;

    /// Stop delivery and release the handle. Calling this more than once is a no-op.
    async fn close(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}
