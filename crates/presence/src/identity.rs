//! Instance identifiers.

use crate::clock::{Clock, SystemClock};

/// Generates a new instance id.
///
/// The id is a zero-padded hex millisecond timestamp followed by a random
/// suffix, so ids created later usually sort after ids created earlier. The
/// ordering is only used as a stable tie-break and is not guaranteed.
#[must_use]
pub fn generate_instance_id() -> String {
    generate_instance_id_with(&SystemClock)
}

/// Generates a new instance id using the given clock for the time component.
#[must_use]
pub fn generate_instance_id_with(clock: &dyn Clock) -> String {
    format!("{:012x}-{:08x}", clock.now_ms(), rand::random::<u32>())
}
