//! Detects other running instances of an application on the same origin and
//! keeps them in agreement about who is present and who leads.
//!
//! Every instance broadcasts periodic heartbeats on a named channel, keeps a
//! table of peers it has heard from recently and evicts the silent ones. The
//! instance with the smallest id is the leader, and only the leader fires the
//! change callback, so a group reports each change once.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Millisecond clocks.
pub mod clock;

/// Instance configuration.
pub mod config;

/// Leader election over known ids.
pub mod election;

mod error;

/// Instance id generation.
pub mod identity;

mod instance;

/// Wire messages exchanged between instances.
pub mod message;

/// Aggregate state and the change callback.
pub mod notifier;

/// Observable snapshots of an instance.
pub mod snapshot;

/// The I/O-free presence coordinator.
pub mod state;

/// The table of alive instances.
pub mod table;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PresenceConfig;
pub use error::{Error, Result};
pub use message::{Message, MessageKind};
pub use snapshot::PresenceSnapshot;

use identity::generate_instance_id_with;
use instance::{Instance, Timings};
use notifier::Notifier;
use state::PresenceState;

use std::sync::Arc;
use std::time::Duration;

use multitab_broadcast::channel::BroadcastChannel;
use multitab_broadcast::transport::BroadcastTransport;
use tokio::sync::watch;
use tracing::warn;

/// A running presence instance.
///
/// Created with [`MultiTab::start`]. Background tasks keep running until
/// [`MultiTab::shutdown`] is awaited or the value is dropped.
pub struct MultiTab<C>
where
    C: BroadcastChannel,
{
    instance: Arc<Instance<C>>,
}

impl<C> MultiTab<C>
where
    C: BroadcastChannel,
{
    /// Joins the configured channel and starts heartbeating.
    ///
    /// If the transport is unsupported or the channel cannot be opened, the
    /// instance still starts but reports itself alone and sends nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub async fn start<T>(transport: &T, config: PresenceConfig) -> Result<Self>
    where
        T: BroadcastTransport<Channel = C>,
    {
        config.validate()?;

        let clock = Arc::clone(&config.clock);
        let self_id = config
            .instance_id
            .clone()
            .unwrap_or_else(|| generate_instance_id_with(clock.as_ref()));

        let channel = if transport.is_supported() {
            match transport.open(config.channel_name.clone()).await {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!(
                        "failed to open channel '{}', running alone: {}",
                        config.channel_name, e
                    );
                    None
                }
            }
        } else {
            None
        };

        let state = PresenceState::new(
            self_id,
            config.url.clone(),
            clock.now_ms(),
            duration_ms(config.inactivity_threshold),
            Notifier::new(config.on_multi_tab_change.clone()),
            config.debug,
        );

        let timings = Timings {
            heartbeat_interval: config.heartbeat_interval,
            reaper_interval: (config.inactivity_threshold / 2).max(Duration::from_millis(1)),
            leader_check_delay: config.leader_check_delay,
        };

        let instance = Arc::new(Instance::new(
            channel,
            clock,
            state,
            timings,
            config.debug,
        ));
        instance.start().await;

        Ok(Self { instance })
    }

    /// Id of this instance.
    #[must_use]
    pub fn self_id(&self) -> &str {
        self.instance.self_id()
    }

    /// Whether the broadcast transport is in use.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.instance.is_supported()
    }

    /// The latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        self.instance.snapshot()
    }

    /// A receiver that is updated whenever the snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PresenceSnapshot> {
        self.instance.subscribe()
    }

    /// Number of alive instances, including this one.
    #[must_use]
    pub fn count(&self) -> usize {
        self.snapshot().count
    }

    /// Whether more than one instance is alive.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.snapshot().is_multi
    }

    /// Whether this instance currently leads its group.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.snapshot().is_leader
    }

    /// Changes the location advertised by this instance. Peers learn about
    /// it with the next heartbeat.
    pub async fn navigate<S>(&self, url: S)
    where
        S: Into<String>,
    {
        self.instance.navigate(url.into()).await;
    }

    /// Asks every peer to re-evaluate leadership, and does so locally after
    /// the configured delay.
    pub async fn request_leader(&self) {
        self.instance.publish(MessageKind::RequestLeader).await;
        self.instance.schedule_leader_check();
    }

    /// Announces departure, stops every background task and closes the
    /// channel. Calling it again has no effect.
    pub async fn shutdown(&self) {
        self.instance.shutdown().await;
    }

    /// Stops every background task without announcing departure, as if the
    /// process had died. Peers only notice once the inactivity threshold
    /// passes.
    pub fn abandon(self) {
        if self.instance.begin_shutdown() {
            self.instance.abort_tasks();
        }
    }
}

impl<C> Drop for MultiTab<C>
where
    C: BroadcastChannel,
{
    fn drop(&mut self) {
        if self.instance.is_shut_down() {
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let instance = Arc::clone(&self.instance);
            handle.spawn(async move {
                instance.shutdown().await;
            });
        } else {
            self.instance.begin_shutdown();
            self.instance.abort_tasks();
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
