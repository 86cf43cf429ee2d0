//! The unreliable datagram channel the transport is layered on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a remote participant, assigned by the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerHandle(pub u64);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Errors a [`PeerChannel`] reports when it refuses a datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The destination is not reachable through this channel.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerHandle),

    /// The datagram is larger than the channel can carry.
    #[error("datagram of {size} bytes exceeds channel limit {max}")]
    DatagramTooLarge {
        /// The actual datagram size.
        size: usize,
        /// The channel's limit.
        max: usize,
    },

    /// The channel refused the datagram for another reason.
    #[error("channel rejected datagram: {0}")]
    Rejected(String),
}

/// Non-blocking, unreliable, unordered datagram channel.
///
/// Implementations must deliver the bytes handed to [`send`](Self::send)
/// unmodified (or not at all), must never block in either direction, and
/// add no framing of their own.
pub trait PeerChannel {
    /// Queue one datagram for `peer`. Never blocks.
    fn send(&mut self, peer: PeerHandle, datagram: &[u8]) -> Result<(), ChannelError>;

    /// Pop one pending datagram into `buf`, returning its length and sender,
    /// or `None` when nothing is pending. Never blocks. A datagram longer
    /// than `buf` is truncated.
    fn receive(&mut self, buf: &mut [u8]) -> Option<(usize, PeerHandle)>;

    /// Peers currently reachable through this channel.
    fn peer_handles(&self) -> Vec<PeerHandle>;

    /// The peer designated primary, if any.
    fn primary_peer_handle(&self) -> Option<PeerHandle>;
}
