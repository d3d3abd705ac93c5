//! Aggregate group state and the leader-only change notification.

use crate::table::PresenceTable;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Callback fired by the leader when the group changes:
/// `(is_multi, count, url_map)`.
pub type ChangeCallback = Arc<dyn Fn(bool, usize, &BTreeMap<String, String>) + Send + Sync>;

/// State derived from the presence table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateState {
    /// More than one instance is alive.
    pub is_multi: bool,

    /// Number of alive instances, including the local one.
    pub count: usize,

    /// Location of every alive instance, keyed by id.
    pub url_map: BTreeMap<String, String>,
}

impl AggregateState {
    /// Derives the aggregate state from a table.
    #[must_use]
    pub fn from_table(table: &PresenceTable) -> Self {
        let count = table.count();

        Self {
            is_multi: count > 1,
            count,
            url_map: table.url_map(),
        }
    }
}

/// Fires the change callback at most once per distinct `(is_multi, count)`
/// pair, and only while the local instance is the leader.
pub struct Notifier {
    callback: Option<ChangeCallback>,
    last_notified: (bool, usize),
}

impl Notifier {
    /// Creates a notifier. A lone instance counts as already notified.
    #[must_use]
    pub fn new(callback: Option<ChangeCallback>) -> Self {
        Self {
            callback,
            last_notified: (false, 1),
        }
    }

    /// Whether a callback is registered.
    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// The pair passed to the last callback invocation.
    #[must_use]
    pub const fn last_notified(&self) -> (bool, usize) {
        self.last_notified
    }

    /// Invokes the callback if `is_leader` and the state differs from the
    /// last notified pair. Returns whether the callback ran.
    pub fn observe(&mut self, state: &AggregateState, is_leader: bool) -> bool {
        if !is_leader {
            return false;
        }

        let Some(callback) = &self.callback else {
            return false;
        };

        let current = (state.is_multi, state.count);
        if current == self.last_notified {
            return false;
        }

        callback(state.is_multi, state.count, &state.url_map);
        self.last_notified = current;
        true
    }
}

impl Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("has_callback", &self.has_callback())
            .field("last_notified", &self.last_notified)
            .finish()
    }
}
