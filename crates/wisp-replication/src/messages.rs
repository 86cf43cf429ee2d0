//! Coordinator wire messages carried as transport payloads.
//!
//! Wire format: `[version: u8] [postcard-encoded ReplicationMessage]`

use serde::{Deserialize, Serialize};

/// Current coordinator protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Everything one coordinator sends another.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ReplicationMessage {
    /// The sender's replicated state. `snapshot` is omitted for peers in the
    /// distant band, which only learn the sender's origin.
    State {
        /// Sender's local clock at send time (seconds), for ordering.
        sent_local: f64,
        /// Sender's origin.
        origin: [f64; 3],
        /// Opaque serialized state.
        snapshot: Option<Vec<u8>>,
    },

    /// An application event.
    Event {
        /// Index into the shared event-type table.
        type_index: u16,
        /// Opaque serialized event.
        payload: Vec<u8>,
    },

    /// Latency and clock probe.
    Ping {
        /// Per-peer probe counter.
        sequence: u32,
        /// Sender's local clock at send time (seconds).
        sent_local: f64,
        /// Sender's network clock at send time (seconds).
        sent_network: f64,
        /// Sender's origin.
        origin: [f64; 3],
        /// Fingerprint of the sender's event-type table.
        event_table: u64,
    },

    /// Reply to a [`ReplicationMessage::Ping`].
    Pong {
        /// Echoed from the ping.
        sequence: u32,
        /// Echoed from the ping.
        sent_local: f64,
        /// Echoed from the ping.
        sent_network: f64,
        /// Responder's network clock when it replied (seconds).
        responder_network: f64,
        /// Responder's origin.
        origin: [f64; 3],
    },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from [`encode`] and [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard encoding or decoding failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize a [`ReplicationMessage`] into a versioned payload.
pub fn encode(message: &ReplicationMessage) -> Result<Vec<u8>, MessageError> {
    let body = postcard::to_allocvec(message)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a versioned payload.
pub fn decode(data: &[u8]) -> Result<ReplicationMessage, MessageError> {
    let (&version, body) = data.split_first().ok_or(MessageError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}
