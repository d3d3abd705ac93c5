//! In-memory implementation of the broadcast crate.
//!
//! Every [`MemoryTransport`] created for the same origin string shares the
//! same set of channels for the lifetime of the process, so separate
//! instances of an application can be simulated inside one test or binary.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Open handles on in-memory channels.
pub mod channel;

/// Origin-scoped transports.
pub mod transport;

pub use channel::MemoryChannel;
pub use transport::MemoryTransport;

use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, broadcast};

/// Buffered payloads per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

static GLOBAL_STATE: LazyLock<Mutex<HashMap<String, OriginState>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A payload tagged with the id of the handle that published it.
type Envelope = (u64, Bytes);

/// Channels of one origin. Only open handles keep a channel's sender alive,
/// so a channel disappears once its last handle is dropped.
#[derive(Default)]
struct OriginState {
    channels: HashMap<String, broadcast::WeakSender<Envelope>>,
}

impl OriginState {
    fn prune(&mut self) {
        self.channels.retain(|_, sender| sender.upgrade().is_some());
    }

    fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn next_handle_id() -> u64 {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}
