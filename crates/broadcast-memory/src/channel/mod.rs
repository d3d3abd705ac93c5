mod error;

use crate::Envelope;
pub use error::Error;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use multitab_broadcast::channel::BroadcastChannel;
use multitab_broadcast::handler::BroadcastHandler;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// An open handle on an in-memory channel.
#[derive(Debug)]
pub struct MemoryChannel {
    name: String,
    origin: String,
    handle_id: u64,
    sender: broadcast::Sender<Envelope>,
    stop_sender: watch::Sender<bool>,
    closed: AtomicBool,
}

impl MemoryChannel {
    pub(crate) fn new(
        name: String,
        origin: String,
        handle_id: u64,
        sender: broadcast::Sender<Envelope>,
    ) -> Self {
        let (stop_sender, _) = watch::channel(false);

        Self {
            name,
            origin,
            handle_id,
            sender,
            stop_sender,
            closed: AtomicBool::new(false),
        }
    }

    /// The origin this handle belongs to.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[async_trait]
impl BroadcastChannel for MemoryChannel {
    type Error = Error;

    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, payload: Bytes) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed(self.name.clone()));
        }

        // Sending only fails when nobody is subscribed, which is not an error here.
        let _ = self.sender.send((self.handle_id, payload));

        Ok(())
    }

    async fn subscribe<X>(&self, handler: X) -> Result<(), Error>
    where
        X: BroadcastHandler,
    {
        if self.is_closed() {
            return Err(Error::Closed(self.name.clone()));
        }

        let mut receiver = self.sender.subscribe();
        let mut stop_receiver = self.stop_sender.subscribe();
        let handle_id = self.handle_id;
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop_receiver.changed() => {
                        break;
                    }
                    envelope = receiver.recv() => {
                        match envelope {
                            Ok((from, _)) if from == handle_id => {}
                            Ok((_, payload)) => {
                                if let Err(e) = handler.handle(name.clone(), payload).await {
                                    warn!("handler for channel '{}' failed: {}", name, e);
                                }
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("subscriber on channel '{}' lagged, skipped {} payloads", name, skipped);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }

            debug!("delivery to handle {} on channel '{}' stopped", handle_id, name);
        });

        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.stop_sender.send(true);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
