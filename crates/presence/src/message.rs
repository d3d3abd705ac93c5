//! Messages exchanged between instances on the broadcast channel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The kind of a presence message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Periodic liveness announcement.
    Heartbeat,

    /// The sender is shutting down.
    InstanceClosed,

    /// The sender just started and wants every live instance to announce itself.
    RequestActiveInstances,

    /// The sender wants every instance to re-surface and re-evaluate leadership.
    RequestLeader,

    /// Any kind this version does not understand.
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// The wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::InstanceClosed => "instance-closed",
            Self::RequestActiveInstances => "request-active-instances",
            Self::RequestLeader => "request-leader",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presence message as it travels over the channel.
///
/// `timestamp` is the sender's clock at send time, in milliseconds since the
/// UNIX epoch. Receivers store it as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// What the message means.
    pub kind: MessageKind,

    /// Id of the sending instance.
    pub sender_id: String,

    /// Sender clock reading at send time.
    pub timestamp: u64,

    /// The sender's current location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Message {
    /// Creates a new message.
    pub fn new<S>(kind: MessageKind, sender_id: S, timestamp: u64, url: Option<String>) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind,
            sender_id: sender_id.into(),
            timestamp,
            url,
        }
    }
}

impl TryFrom<Bytes> for Message {
    type Error = serde_json::Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        serde_json::from_slice(&bytes)
    }
}

impl TryInto<Bytes> for Message {
    type Error = serde_json::Error;

    fn try_into(self) -> Result<Bytes, Self::Error> {
        Ok(Bytes::from(serde_json::to_vec(&self)?))
    }
}
