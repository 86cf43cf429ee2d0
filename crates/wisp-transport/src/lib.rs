//! Reliable messaging over an unreliable, unordered datagram channel:
//! envelope framing with CRC-8, per-peer sequencing, duplicate suppression,
//! acks, timed resend, and timed discard.

pub mod channel;
pub mod control;
pub mod counters;
pub mod crc8;
pub mod envelope;
pub mod memory;
pub mod transport;

#[cfg(test)]
mod transport_tests;

pub use channel::{ChannelError, PeerChannel, PeerHandle};
pub use control::{ControlRecord, InFlight, ReceiveHistory};
pub use counters::TransportCounters;
pub use crc8::crc8;
pub use envelope::{Envelope, EnvelopeError, EnvelopeKind, MAX_DATAGRAM, MAX_PAYLOAD};
pub use memory::{LinkConditions, MemoryChannel, MemoryNetwork, MemoryStats};
pub use transport::{Delivery, ReliableTransport, TransportError};
