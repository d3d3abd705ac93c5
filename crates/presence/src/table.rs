//! Local view of which instances are alive.

use std::collections::{BTreeMap, HashMap};

/// Last known liveness of one instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Instance id.
    pub id: String,

    /// Timestamp of the last heartbeat, as stamped by the instance itself.
    pub last_heartbeat: u64,

    /// Last location the instance reported.
    pub url: String,
}

/// Mapping from instance id to its presence entry.
///
/// The table always holds an entry for the local instance. Entries for
/// remote instances carry the remote's own timestamps, without skew
/// correction.
#[derive(Clone, Debug)]
pub struct PresenceTable {
    self_id: String,
    entries: HashMap<String, PresenceEntry>,
}

impl PresenceTable {
    /// Creates a table holding only the local instance.
    #[must_use]
    pub fn new(self_id: String, now_ms: u64, url: String) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            self_id.clone(),
            PresenceEntry {
                id: self_id.clone(),
                last_heartbeat: now_ms,
                url,
            },
        );

        Self { self_id, entries }
    }

    /// Id of the local instance.
    #[must_use]
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Number of known instances, including the local one.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the entry for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PresenceEntry> {
        self.entries.get(id)
    }

    /// Whether `id` is known.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// All known ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Inserts or refreshes an entry. Returns `true` if `id` was not known yet.
    pub fn upsert(&mut self, id: &str, last_heartbeat: u64, url: String) -> bool {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.last_heartbeat = last_heartbeat;
            entry.url = url;
            return false;
        }

        self.entries.insert(
            id.to_string(),
            PresenceEntry {
                id: id.to_string(),
                last_heartbeat,
                url,
            },
        );
        true
    }

    /// Removes a remote entry. The local entry is never removed.
    pub fn remove(&mut self, id: &str) -> bool {
        if id == self.self_id {
            return false;
        }

        self.entries.remove(id).is_some()
    }

    /// Refreshes the local entry.
    pub fn refresh_self(&mut self, now_ms: u64, url: &str) {
        if let Some(entry) = self.entries.get_mut(&self.self_id) {
            entry.last_heartbeat = now_ms;
            url.clone_into(&mut entry.url);
        }
    }

    /// Evicts every remote entry whose last heartbeat is at least
    /// `threshold_ms` old. Returns the evicted ids.
    ///
    /// An entry stamped in the future never counts as stale until `now_ms`
    /// catches up with it.
    pub fn evict_stale(&mut self, now_ms: u64, threshold_ms: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.id != self.self_id)
            .filter(|entry| now_ms.saturating_sub(entry.last_heartbeat) >= threshold_ms)
            .map(|entry| entry.id.clone())
            .collect();

        for id in &stale {
            self.entries.remove(id);
        }

        stale
    }

    /// Location of every known instance, keyed by id.
    #[must_use]
    pub fn url_map(&self) -> BTreeMap<String, String> {
        self.entries
            .values()
            .map(|entry| (entry.id.clone(), entry.url.clone()))
            .collect()
    }
}
