//! Per-peer control records: sequence counters, duplicate history, and the
//! queue of reliable messages awaiting an ack.

use std::collections::VecDeque;
use std::time::Duration;

/// A reliable message that has been sent but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// Sequence number carried by the envelope.
    pub sequence: u8,
    /// The encoded envelope, resent unchanged.
    pub datagram: Vec<u8>,
    /// Transport time of the first send.
    pub first_sent: Duration,
    /// Transport time of the most recent (re)send.
    pub last_sent: Duration,
    /// Whether the envelope has been sent more than once.
    pub resent: bool,
}

/// The last two sequence numbers accepted on one channel.
///
/// Only two slots are kept, so a duplicate is recognised only while at most
/// one other message has been accepted since the original.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveHistory {
    slots: [Option<u8>; 2],
}

impl ReceiveHistory {
    /// Whether `sequence` matches either remembered slot.
    pub fn contains(&self, sequence: u8) -> bool {
        self.slots.contains(&Some(sequence))
    }

    /// Remember `sequence`, forgetting the older slot.
    pub fn push(&mut self, sequence: u8) {
        self.slots[1] = self.slots[0];
        self.slots[0] = Some(sequence);
    }

    /// Accept `sequence` if it is new. Returns `false` for a duplicate.
    pub fn accept(&mut self, sequence: u8) -> bool {
        if self.contains(sequence) {
            false
        } else {
            self.push(sequence);
            true
        }
    }
}

/// Transport bookkeeping for one remote peer.
#[derive(Debug, Clone)]
pub struct ControlRecord {
    next_unreliable: u8,
    next_reliable: u8,
    /// Reliable messages awaiting an ack, oldest first.
    pub in_flight: VecDeque<InFlight>,
    /// Duplicate history for the unreliable channel.
    pub unreliable_history: ReceiveHistory,
    /// Duplicate history for the reliable channel.
    pub reliable_history: ReceiveHistory,
    /// Whether the channel listed this peer on the last refresh.
    pub alive: bool,
    /// Set on discard-deadline expiry or a corrupt payload; cleared on any
    /// successful receive or ack.
    pub faulty: bool,
}

impl Default for ControlRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlRecord {
    /// A fresh record for a peer seen for the first time.
    pub fn new() -> Self {
        Self {
            next_unreliable: 0,
            next_reliable: 0,
            in_flight: VecDeque::new(),
            unreliable_history: ReceiveHistory::default(),
            reliable_history: ReceiveHistory::default(),
            alive: true,
            faulty: false,
        }
    }

    /// The sequence number the next send on the given channel will take.
    pub fn peek_sequence(&self, reliable: bool) -> u8 {
        if reliable {
            self.next_reliable
        } else {
            self.next_unreliable
        }
    }

    /// Take the next sequence number for the given channel, wrapping at 256.
    pub fn next_sequence(&mut self, reliable: bool) -> u8 {
        let counter = if reliable {
            &mut self.next_reliable
        } else {
            &mut self.next_unreliable
        };
        let sequence = *counter;
        *counter = counter.wrapping_add(1);
        sequence
    }

    /// Queue a reliable send. If the queue already holds `cap` entries the
    /// oldest ones are dropped to make room; the number dropped is returned.
    pub fn push_in_flight(&mut self, entry: InFlight, cap: usize) -> usize {
        let mut dropped = 0;
        while !self.in_flight.is_empty() && self.in_flight.len() >= cap {
            self.in_flight.pop_front();
            dropped += 1;
        }
        self.in_flight.push_back(entry);
        dropped
    }

    /// Drop oldest entries until at most `cap` remain. Returns how many
    /// were dropped.
    pub fn trim_in_flight(&mut self, cap: usize) -> usize {
        let excess = self.in_flight.len().saturating_sub(cap);
        self.in_flight.drain(..excess);
        excess
    }

    /// Remove and return the in-flight entry with `sequence`, if present.
    pub fn acknowledge(&mut self, sequence: u8) -> Option<InFlight> {
        let position = self
            .in_flight
            .iter()
            .position(|entry| entry.sequence == sequence)?;
        self.in_flight.remove(position)
    }
}
