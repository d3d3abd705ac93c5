//! The per-instance coordinator: presence table, leadership and notification.
//!
//! [`PresenceState`] performs no I/O. Incoming messages and timer ticks are
//! applied as method calls, and the returned [`Reaction`] tells the caller
//! what must be published or scheduled in response.

use crate::election;
use crate::message::{Message, MessageKind};
use crate::notifier::{AggregateState, Notifier};
use crate::snapshot::PresenceSnapshot;
use crate::table::PresenceTable;

use tracing::{debug, warn};

/// What the driver must do after a message was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing to do.
    Ignored,

    /// The table changed and state was recomputed.
    Recomputed,

    /// State was recomputed and the sender expects a heartbeat in reply.
    RecomputedAndReply,

    /// Reply with a heartbeat, then schedule a debounced leader check.
    ReplyAndCheckLeader,
}

/// Presence coordinator owned by one instance for its whole lifetime.
#[derive(Debug)]
pub struct PresenceState {
    table: PresenceTable,
    url: String,
    inactivity_threshold_ms: u64,
    notifier: Notifier,
    aggregate: AggregateState,
    is_leader: bool,
    debug: bool,
}

impl PresenceState {
    /// Creates the state of a freshly started instance.
    #[must_use]
    pub fn new(
        self_id: String,
        url: String,
        now_ms: u64,
        inactivity_threshold_ms: u64,
        notifier: Notifier,
        debug: bool,
    ) -> Self {
        let table = PresenceTable::new(self_id, now_ms, url.clone());
        let aggregate = AggregateState::from_table(&table);

        Self {
            table,
            url,
            inactivity_threshold_ms,
            notifier,
            aggregate,
            is_leader: true,
            debug,
        }
    }

    /// Id of the local instance.
    #[must_use]
    pub fn self_id(&self) -> &str {
        self.table.self_id()
    }

    /// Current location of the local instance.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Updates the local location. Takes effect on the next recomputation.
    pub fn set_url<S>(&mut self, url: S)
    where
        S: Into<String>,
    {
        self.url = url.into();
    }

    /// The presence table.
    #[must_use]
    pub const fn table(&self) -> &PresenceTable {
        &self.table
    }

    /// Aggregate state as of the last recomputation.
    #[must_use]
    pub const fn aggregate(&self) -> &AggregateState {
        &self.aggregate
    }

    /// Leadership as of the last recomputation.
    #[must_use]
    pub const fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Builds a message from the local instance.
    #[must_use]
    pub fn outgoing(&self, kind: MessageKind, now_ms: u64) -> Message {
        Message::new(kind, self.self_id(), now_ms, Some(self.url.clone()))
    }

    /// Applies a message received from the channel.
    pub fn handle(&mut self, message: &Message, now_ms: u64) -> Reaction {
        if message.sender_id == self.self_id() {
            return Reaction::Ignored;
        }

        if self.debug {
            debug!(
                "{} received {} from {}",
                self.self_id(),
                message.kind,
                message.sender_id
            );
        }

        match message.kind {
            MessageKind::Heartbeat => {
                self.upsert_sender(message);
                self.recompute(now_ms);
                Reaction::Recomputed
            }
            MessageKind::RequestActiveInstances => {
                self.upsert_sender(message);
                self.recompute(now_ms);
                Reaction::RecomputedAndReply
            }
            MessageKind::InstanceClosed => {
                self.table.remove(&message.sender_id);
                self.recompute(now_ms);
                Reaction::Recomputed
            }
            MessageKind::RequestLeader => Reaction::ReplyAndCheckLeader,
            MessageKind::Unknown => {
                warn!(
                    "ignoring message of unrecognized kind from {}",
                    message.sender_id
                );
                Reaction::Ignored
            }
        }
    }

    /// Evicts stale peers. Recomputes only if something was evicted.
    /// Returns the number of evicted peers.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let evicted = self
            .table
            .evict_stale(now_ms, self.inactivity_threshold_ms);

        if evicted.is_empty() {
            return 0;
        }

        if self.debug {
            debug!("{} evicted inactive {:?}", self.self_id(), evicted);
        }

        self.recompute(now_ms);
        evicted.len()
    }

    /// Refreshes the local entry, re-derives aggregate state and leadership,
    /// and notifies if this instance leads and the state changed. Returns
    /// whether the callback ran.
    pub fn recompute(&mut self, now_ms: u64) -> bool {
        self.table.refresh_self(now_ms, &self.url);
        self.aggregate = AggregateState::from_table(&self.table);
        self.is_leader = election::is_leader(self.table.self_id(), self.table.ids());

        let notified = self.notifier.observe(&self.aggregate, self.is_leader);

        if self.debug {
            debug!(
                "{} sees {} instance(s), leader: {}, notified: {}",
                self.self_id(),
                self.aggregate.count,
                self.is_leader,
                notified
            );
        }

        notified
    }

    /// Snapshot of the current state for observers.
    #[must_use]
    pub fn snapshot(&self, is_supported: bool) -> PresenceSnapshot {
        PresenceSnapshot {
            is_multi: self.aggregate.is_multi,
            count: self.aggregate.count,
            self_id: self.self_id().to_string(),
            is_supported,
            url_map: self.aggregate.url_map.clone(),
            is_leader: self.is_leader,
        }
    }

    fn upsert_sender(&mut self, message: &Message) {
        self.table.upsert(
            &message.sender_id,
            message.timestamp,
            message.url.clone().unwrap_or_default(),
        );
    }
}
