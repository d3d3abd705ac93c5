use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::notifier::ChangeCallback;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

/// Default period between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default silence after which a peer is presumed gone.
pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(30);

/// Default wait between a `request-leader` message and the leader re-check.
pub const DEFAULT_LEADER_CHECK_DELAY: Duration = Duration::from_millis(100);

/// Configuration for a presence instance.
#[derive(Clone)]
pub struct PresenceConfig {
    /// Name of the channel. Only instances on the same name see each other.
    pub channel_name: String,

    /// Period between heartbeats.
    pub heartbeat_interval: Duration,

    /// Silence after which a peer is evicted. Should exceed the heartbeat interval.
    pub inactivity_threshold: Duration,

    /// Delay before leadership is re-evaluated after a `request-leader` message.
    pub leader_check_delay: Duration,

    /// Emit diagnostic events for every message, sweep and recomputation.
    pub debug: bool,

    /// Initial location of this instance.
    pub url: String,

    /// Fixed instance id. A fresh id is generated when unset.
    pub instance_id: Option<String>,

    /// Callback fired by the leader when the group changes.
    pub on_multi_tab_change: Option<ChangeCallback>,

    /// Clock used for timestamps and staleness.
    pub clock: Arc<dyn Clock>,
}

impl PresenceConfig {
    /// Creates a configuration with default timings for the given channel.
    pub fn new<S>(channel_name: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            channel_name: channel_name.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            inactivity_threshold: DEFAULT_INACTIVITY_THRESHOLD,
            leader_check_delay: DEFAULT_LEADER_CHECK_DELAY,
            debug: false,
            url: String::new(),
            instance_id: None,
            on_multi_tab_change: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the inactivity threshold.
    #[must_use]
    pub fn with_inactivity_threshold(mut self, threshold: Duration) -> Self {
        self.inactivity_threshold = threshold;
        self
    }

    /// Sets the leader re-check delay.
    #[must_use]
    pub fn with_leader_check_delay(mut self, delay: Duration) -> Self {
        self.leader_check_delay = delay;
        self
    }

    /// Enables or disables diagnostic logging.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the initial location.
    #[must_use]
    pub fn with_url<S>(mut self, url: S) -> Self
    where
        S: Into<String>,
    {
        self.url = url.into();
        self
    }

    /// Fixes the instance id instead of generating one.
    #[must_use]
    pub fn with_instance_id<S>(mut self, instance_id: S) -> Self
    where
        S: Into<String>,
    {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Registers the change callback.
    #[must_use]
    pub fn with_on_multi_tab_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(bool, usize, &BTreeMap<String, String>) + Send + Sync + 'static,
    {
        self.on_multi_tab_change = Some(Arc::new(callback));
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel name or instance id is empty, or if
    /// any duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.channel_name.is_empty() {
            return Err(Error::Config("channel name must not be empty".to_string()));
        }

        if self.instance_id.as_deref() == Some("") {
            return Err(Error::Config("instance id must not be empty".to_string()));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config(
                "heartbeat interval must be positive".to_string(),
            ));
        }

        if self.inactivity_threshold.is_zero() {
            return Err(Error::Config(
                "inactivity threshold must be positive".to_string(),
            ));
        }

        if self.inactivity_threshold <= self.heartbeat_interval {
            warn!(
                "inactivity threshold ({:?}) does not exceed heartbeat interval ({:?}); live peers may be evicted",
                self.inactivity_threshold, self.heartbeat_interval
            );
        }

        Ok(())
    }
}

impl Debug for PresenceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceConfig")
            .field("channel_name", &self.channel_name)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("inactivity_threshold", &self.inactivity_threshold)
            .field("leader_check_delay", &self.leader_check_delay)
            .field("debug", &self.debug)
            .field("url", &self.url)
            .field("instance_id", &self.instance_id)
            .field("on_multi_tab_change", &self.on_multi_tab_change.is_some())
            .finish_non_exhaustive()
    }
}
