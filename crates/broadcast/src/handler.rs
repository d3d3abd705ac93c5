use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for handler errors
pub trait BroadcastHandlerError: Debug + Error + Send + Sync + 'static {}

/// A trait representing a consumer of payloads delivered on a channel.
///
/// Payloads published through a channel handle are never delivered back to
/// the handler subscribed on that same handle.
#[async_trait]
pub trait BroadcastHandler
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for the handler.
    type Error: BroadcastHandlerError;

    /// Handles a payload received on the named channel.
    async fn handle(&self, channel_name: String, payload: Bytes) -> Result<(), Self::Error>;
}
