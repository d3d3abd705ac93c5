mod error;

use crate::channel::MemoryChannel;
use crate::{CHANNEL_CAPACITY, GLOBAL_STATE, next_handle_id};
pub use error::Error;

use async_trait::async_trait;
use multitab_broadcast::transport::BroadcastTransport;
use tokio::sync::broadcast;

/// A transport scoped to one origin.
///
/// Transports created with the same origin string see the same channels.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    origin: Option<String>,
}

impl MemoryTransport {
    /// Creates a transport for the given origin.
    pub fn new<K>(origin: K) -> Self
    where
        K: Into<String>,
    {
        Self {
            origin: Some(origin.into()),
        }
    }

    /// Creates a transport without a broadcast primitive. Every `open` fails
    /// with [`Error::Unsupported`].
    #[must_use]
    pub const fn unsupported() -> Self {
        Self { origin: None }
    }

    /// The origin of this transport, if supported.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }
}

#[async_trait]
impl BroadcastTransport for MemoryTransport {
    type Error = Error;
    type Channel = MemoryChannel;

    fn is_supported(&self) -> bool {
        self.origin.is_some()
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn open<K>(&self, channel_name: K) -> Result<MemoryChannel, Error>
    where
        K: Clone + Into<String> + Send,
    {
        let Some(origin) = &self.origin else {
            return Err(Error::Unsupported);
        };

        let name = channel_name.into();
        if name.is_empty() {
            return Err(Error::InvalidChannelName);
        }

        let mut state = GLOBAL_STATE.lock().await;
        state.retain(|_, origin_state| {
            origin_state.prune();
            !origin_state.is_empty()
        });

        let channels = &mut state.entry(origin.clone()).or_default().channels;
        let existing = channels
            .get(&name)
            .and_then(broadcast::WeakSender::upgrade);
        let sender = if let Some(sender) = existing {
            sender
        } else {
            let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
            channels.insert(name.clone(), sender.downgrade());
            sender
        };

        Ok(MemoryChannel::new(
            name,
            origin.clone(),
            next_handle_id(),
            sender,
        ))
    }
}
