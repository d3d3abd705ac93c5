//! Deterministic leader election over the set of known ids.
//!
//! No votes are exchanged: every instance sorts the ids it knows about and
//! picks the smallest. Instances agree on the leader as soon as their
//! presence tables agree, and not before.

/// Returns the leader among `ids`, the lexicographically smallest one.
pub fn leader_of<'a, I>(ids: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    ids.into_iter().min()
}

/// Whether `self_id` leads the group made of itself and `known_ids`.
pub fn is_leader<'a, I>(self_id: &'a str, known_ids: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    leader_of(std::iter::once(self_id).chain(known_ids)) == Some(self_id)
}
