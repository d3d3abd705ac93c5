use std::collections::BTreeMap;

/// What an instance currently knows about its group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceSnapshot {
    /// More than one instance is alive.
    pub is_multi: bool,

    /// Number of alive instances, including this one.
    pub count: usize,

    /// Id of this instance.
    pub self_id: String,

    /// Whether the broadcast transport is available. When it is not, the
    /// instance always reports itself alone.
    pub is_supported: bool,

    /// Location of every alive instance, keyed by id.
    pub url_map: BTreeMap<String, String>,

    /// Whether this instance currently considers itself the leader.
    pub is_leader: bool,
}
