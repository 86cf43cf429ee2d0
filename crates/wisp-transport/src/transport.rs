//! Reliable transport over an unreliable [`PeerChannel`].
//!
//! Splits the channel into two logical channels per peer. Unreliable
//! messages are sent once and may be lost. Reliable messages are resent
//! every `resend_interval` until acked, and discarded (peer marked faulty)
//! once `discard_timeout` has passed since the first send. Both channels
//! suppress duplicates with a two-slot receive history.
//!
//! Time is driven by the caller: [`ReliableTransport::update`] takes the
//! tick length and advances the transport's own clock.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use wisp_config::{ConfigError, TransportConfig};

use crate::channel::{ChannelError, PeerChannel, PeerHandle};
use crate::control::{ControlRecord, InFlight};
use crate::counters::TransportCounters;
use crate::envelope::{
    self, Envelope, EnvelopeError, MAX_DATAGRAM, MAX_PAYLOAD, encode_ack, encode_message,
};

/// Errors returned by [`ReliableTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The payload does not fit in one envelope.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: usize,
        /// The maximum.
        max: usize,
    },

    /// The underlying channel refused the datagram.
    #[error("channel send to {peer} failed: {source}")]
    Channel {
        /// Destination of the refused datagram.
        peer: PeerHandle,
        /// Why the channel refused it.
        #[source]
        source: ChannelError,
    },
}

/// A payload surfaced by [`ReliableTransport::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Sender.
    pub peer: PeerHandle,
    /// Application bytes, unmodified.
    pub payload: Vec<u8>,
    /// Whether it arrived on the reliable channel.
    pub reliable: bool,
}

/// Reliable/unreliable messaging with duplicate suppression on top of a
/// [`PeerChannel`].
pub struct ReliableTransport<C: PeerChannel> {
    channel: C,
    config: TransportConfig,
    records: HashMap<PeerHandle, ControlRecord>,
    now: Duration,
    counters: TransportCounters,
    recv_buf: Vec<u8>,
}

impl<C: PeerChannel> ReliableTransport<C> {
    /// Wrap `channel` with the given timers and window.
    pub fn new(channel: C, config: TransportConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            channel,
            config,
            records: HashMap::new(),
            now: Duration::ZERO,
            counters: TransportCounters::default(),
            recv_buf: vec![0u8; MAX_DATAGRAM + 1],
        })
    }

    /// Replace the configuration. Takes effect on the next call that reads
    /// it; a smaller window is enforced on the next [`update`](Self::update).
    pub fn set_config(&mut self, config: TransportConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Current configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Transport clock: the sum of every `dt` passed to `update`.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// The wrapped channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Mutable access to the wrapped channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Lifetime counters.
    pub fn counters(&self) -> &TransportCounters {
        &self.counters
    }

    /// Send `payload` to `peer`.
    ///
    /// A reliable send is queued for resend until acknowledged. If the
    /// peer's queue is full, the oldest queued message is dropped and the
    /// overflow is logged as an error.
    pub fn send(
        &mut self,
        peer: PeerHandle,
        payload: &[u8],
        reliable: bool,
    ) -> Result<(), TransportError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let sequence = self
            .records
            .get(&peer)
            .map_or(0, |record| record.peek_sequence(reliable));
        let datagram = encode_message(reliable, sequence, payload).map_err(|_| {
            TransportError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            }
        })?;

        self.channel
            .send(peer, &datagram)
            .map_err(|source| TransportError::Channel { peer, source })?;
        // Refused sends leave no record and use up no sequence number.
        let record = self.records.entry(peer).or_default();
        record.next_sequence(reliable);
        self.counters.datagrams_sent += 1;
        tracing::trace!(%peer, sequence, reliable, len = payload.len(), "sent envelope");

        if reliable {
            let dropped = record.push_in_flight(
                InFlight {
                    sequence,
                    datagram,
                    first_sent: self.now,
                    last_sent: self.now,
                    resent: false,
                },
                self.config.max_in_flight,
            );
            if dropped > 0 {
                self.counters.window_overflows += dropped as u64;
                tracing::error!(
                    %peer,
                    dropped,
                    window = self.config.max_in_flight,
                    "reliable window full, dropped oldest in-flight messages"
                );
            }
        }
        Ok(())
    }

    /// Drain the channel until a new payload is found or nothing is pending.
    ///
    /// Acks are consumed internally; corrupt, malformed and duplicate
    /// datagrams are dropped. Every reliable envelope with a valid checksum
    /// is acked, duplicates included.
    pub fn receive(&mut self) -> Option<Delivery> {
        loop {
            let (len, peer) = self.channel.receive(&mut self.recv_buf)?;
            self.counters.datagrams_received += 1;

            let datagram = &self.recv_buf[..len];
            let record = self.records.entry(peer).or_default();

            match envelope::decode(datagram) {
                Ok(Envelope::Ack { sequence }) => {
                    self.counters.acks_received += 1;
                    if let Some(entry) = record.acknowledge(sequence) {
                        self.counters.acks_matched += 1;
                        record.faulty = false;
                        if entry.resent {
                            tracing::debug!(
                                %peer,
                                sequence,
                                after = ?self.now.saturating_sub(entry.first_sent),
                                "ack arrived for resent message"
                            );
                        }
                    } else {
                        tracing::trace!(%peer, sequence, "ack for nothing in flight");
                    }
                }
                Ok(Envelope::Message {
                    reliable,
                    sequence,
                    payload,
                }) => {
                    record.faulty = false;
                    let history = if reliable {
                        let ack = encode_ack(sequence);
                        match self.channel.send(peer, &ack) {
                            Ok(()) => self.counters.acks_sent += 1,
                            Err(e) => tracing::warn!(%peer, sequence, "failed to send ack: {e}"),
                        }
                        &mut record.reliable_history
                    } else {
                        &mut record.unreliable_history
                    };

                    if !history.accept(sequence) {
                        self.counters.duplicates += 1;
                        tracing::debug!(%peer, sequence, reliable, "suppressed duplicate");
                        continue;
                    }

                    self.counters.payloads_delivered += 1;
                    return Some(Delivery {
                        peer,
                        payload: payload.to_vec(),
                        reliable,
                    });
                }
                Err(EnvelopeError::ChecksumMismatch { kind, sequence, .. }) => {
                    self.counters.corrupt += 1;
                    record.faulty = true;
                    tracing::warn!(%peer, ?kind, sequence, "dropped corrupt datagram");
                }
                Err(e) => {
                    self.counters.malformed += 1;
                    tracing::warn!(%peer, len, "dropped malformed datagram: {e}");
                }
            }
        }
    }

    /// Advance the transport clock by `dt` and run the per-tick duties:
    /// refresh liveness from the channel, enforce the window, discard
    /// expired reliable messages, and resend unacknowledged ones.
    pub fn update(&mut self, dt: Duration) {
        self.now += dt;
        self.refresh_peers();

        let now = self.now;
        let resend_interval = self.config.resend_interval();
        let discard_timeout = self.config.discard_timeout();
        let cap = self.config.max_in_flight;

        for (&peer, record) in &mut self.records {
            let trimmed = record.trim_in_flight(cap);
            if trimmed > 0 {
                self.counters.window_overflows += trimmed as u64;
                tracing::error!(%peer, trimmed, window = cap, "reliable window over capacity, dropped oldest");
            }

            let expired = record
                .in_flight
                .iter()
                .any(|entry| now.saturating_sub(entry.first_sent) >= discard_timeout);
            if expired {
                let discarded = record.in_flight.len();
                record.in_flight.clear();
                record.faulty = true;
                self.counters.discarded += discarded as u64;
                tracing::error!(
                    %peer,
                    discarded,
                    timeout = ?discard_timeout,
                    "reliable delivery timed out, peer marked faulty"
                );
                continue;
            }

            for entry in &mut record.in_flight {
                if now.saturating_sub(entry.last_sent) < resend_interval {
                    continue;
                }
                match self.channel.send(peer, &entry.datagram) {
                    Ok(()) => {
                        entry.last_sent = now;
                        entry.resent = true;
                        self.counters.resends += 1;
                        tracing::trace!(%peer, sequence = entry.sequence, "resent");
                    }
                    Err(e) => {
                        tracing::warn!(%peer, sequence = entry.sequence, "resend failed: {e}");
                    }
                }
            }
        }
    }

    /// Mark records alive or not from the channel's peer list. A record
    /// that was already not alive on the previous refresh is removed.
    fn refresh_peers(&mut self) {
        let live: HashSet<PeerHandle> = self.channel.peer_handles().into_iter().collect();
        self.records.retain(|peer, record| {
            if live.contains(peer) {
                record.alive = true;
                return true;
            }
            if record.alive {
                record.alive = false;
                return true;
            }
            if !record.in_flight.is_empty() {
                tracing::info!(
                    %peer,
                    dropped = record.in_flight.len(),
                    "peer gone, dropping its in-flight messages"
                );
            } else {
                tracing::debug!(%peer, "peer gone, control record removed");
            }
            false
        });
    }

    /// Peers with a control record that are alive and not faulty.
    pub fn usable_peers(&self) -> Vec<PeerHandle> {
        let mut peers: Vec<PeerHandle> = self
            .records
            .iter()
            .filter(|(_, record)| record.alive && !record.faulty)
            .map(|(&peer, _)| peer)
            .collect();
        peers.sort();
        peers
    }

    /// Every peer with a control record.
    pub fn known_peers(&self) -> Vec<PeerHandle> {
        let mut peers: Vec<PeerHandle> = self.records.keys().copied().collect();
        peers.sort();
        peers
    }

    /// Whether `peer` is currently flagged faulty. Unknown peers are not.
    pub fn is_faulty(&self, peer: PeerHandle) -> bool {
        self.records.get(&peer).is_some_and(|record| record.faulty)
    }

    /// Whether `peer` has a record that the channel still lists.
    pub fn is_alive(&self, peer: PeerHandle) -> bool {
        self.records.get(&peer).is_some_and(|record| record.alive)
    }

    /// Number of reliable messages to `peer` awaiting an ack.
    pub fn in_flight_len(&self, peer: PeerHandle) -> usize {
        self.records
            .get(&peer)
            .map_or(0, |record| record.in_flight.len())
    }

    /// The control record for `peer`, if one exists.
    pub fn record(&self, peer: PeerHandle) -> Option<&ControlRecord> {
        self.records.get(&peer)
    }

    /// The peer the channel designates primary.
    pub fn primary_peer(&self) -> Option<PeerHandle> {
        self.channel.primary_peer_handle()
    }
}
