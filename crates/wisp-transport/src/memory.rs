//! In-process peer channel with seeded, configurable link conditions.
//!
//! A [`MemoryNetwork`] is a hub of per-peer inboxes. Each registered peer
//! gets a [`MemoryChannel`] endpoint implementing [`PeerChannel`]. Datagrams
//! are copied into the destination inbox at send time, after the hub's
//! [`LinkConditions`] decide whether to drop, duplicate, reorder, or
//! corrupt them. Everything is driven by one seeded RNG, so a run is
//! reproducible for a given seed and call order.
//!
//! The hub is single-threaded (`Rc<RefCell<_>>`), matching the tick model
//! of the transport.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use crate::channel::{ChannelError, PeerChannel, PeerHandle};
use crate::envelope::MAX_DATAGRAM;

/// Probabilities applied to every datagram sent through the hub.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinkConditions {
    /// Probability that a datagram is dropped.
    pub loss_rate: f64,
    /// Probability that a delivered datagram is delivered a second time.
    pub duplicate_rate: f64,
    /// Probability that a datagram is queued ahead of everything pending.
    pub reorder_rate: f64,
    /// Probability that one random bit of a datagram is flipped.
    pub corrupt_rate: f64,
}

impl LinkConditions {
    /// A link that delivers every datagram once, in order, intact.
    pub fn perfect() -> Self {
        Self::default()
    }
}

/// Hub-wide totals, for assertions and reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Datagrams accepted from senders.
    pub sent: u64,
    /// Datagrams dropped by the loss roll.
    pub dropped: u64,
    /// Extra copies queued by the duplicate roll.
    pub duplicated: u64,
    /// Datagrams queued out of order.
    pub reordered: u64,
    /// Datagrams with a flipped bit.
    pub corrupted: u64,
}

struct Hub {
    inboxes: BTreeMap<PeerHandle, VecDeque<(PeerHandle, Vec<u8>)>>,
    conditions: LinkConditions,
    rng: Xoshiro256StarStar,
    primary: Option<PeerHandle>,
    stats: MemoryStats,
}

impl Hub {
    fn deliver(&mut self, from: PeerHandle, to: PeerHandle, datagram: &[u8]) {
        self.stats.sent += 1;
        let conditions = self.conditions;

        if conditions.loss_rate > 0.0 && self.rng.gen_bool(conditions.loss_rate.min(1.0)) {
            self.stats.dropped += 1;
            return;
        }

        let mut bytes = datagram.to_vec();
        if conditions.corrupt_rate > 0.0
            && !bytes.is_empty()
            && self.rng.gen_bool(conditions.corrupt_rate.min(1.0))
        {
            let byte = self.rng.gen_range(0..bytes.len());
            let bit = self.rng.gen_range(0..8u8);
            bytes[byte] ^= 1 << bit;
            self.stats.corrupted += 1;
        }

        let copies = if conditions.duplicate_rate > 0.0
            && self.rng.gen_bool(conditions.duplicate_rate.min(1.0))
        {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };

        let reorder =
            conditions.reorder_rate > 0.0 && self.rng.gen_bool(conditions.reorder_rate.min(1.0));

        let Some(inbox) = self.inboxes.get_mut(&to) else {
            return;
        };
        for _ in 0..copies {
            if reorder {
                inbox.push_front((from, bytes.clone()));
            } else {
                inbox.push_back((from, bytes.clone()));
            }
        }
        if reorder {
            self.stats.reordered += 1;
        }
    }
}

/// Shared in-memory network. Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    /// Create an empty network with the given conditions and RNG seed.
    pub fn new(conditions: LinkConditions, seed: u64) -> Self {
        Self {
            hub: Rc::new(RefCell::new(Hub {
                inboxes: BTreeMap::new(),
                conditions,
                rng: Xoshiro256StarStar::seed_from_u64(seed),
                primary: None,
                stats: MemoryStats::default(),
            })),
        }
    }

    /// A lossless network.
    pub fn perfect() -> Self {
        Self::new(LinkConditions::perfect(), 0)
    }

    /// Register `handle` and return its endpoint. Registering an existing
    /// handle returns a second endpoint sharing the same inbox.
    pub fn endpoint(&self, handle: PeerHandle) -> MemoryChannel {
        self.hub.borrow_mut().inboxes.entry(handle).or_default();
        MemoryChannel {
            local: handle,
            hub: Rc::clone(&self.hub),
        }
    }

    /// Remove `handle` from the network, discarding its pending datagrams.
    /// Clears the primary designation if it pointed at `handle`.
    pub fn disconnect(&self, handle: PeerHandle) {
        let mut hub = self.hub.borrow_mut();
        hub.inboxes.remove(&handle);
        if hub.primary == Some(handle) {
            hub.primary = None;
        }
    }

    /// Every registered handle, in ascending order.
    pub fn members(&self) -> Vec<PeerHandle> {
        self.hub.borrow().inboxes.keys().copied().collect()
    }

    /// Whether `handle` is registered.
    pub fn contains(&self, handle: PeerHandle) -> bool {
        self.hub.borrow().inboxes.contains_key(&handle)
    }

    /// Designate the primary peer.
    pub fn set_primary(&self, handle: Option<PeerHandle>) {
        self.hub.borrow_mut().primary = handle;
    }

    /// The designated primary peer.
    pub fn primary(&self) -> Option<PeerHandle> {
        self.hub.borrow().primary
    }

    /// Replace the link conditions for subsequent sends.
    pub fn set_conditions(&self, conditions: LinkConditions) {
        self.hub.borrow_mut().conditions = conditions;
    }

    /// Current link conditions.
    pub fn conditions(&self) -> LinkConditions {
        self.hub.borrow().conditions
    }

    /// Hub-wide totals.
    pub fn stats(&self) -> MemoryStats {
        self.hub.borrow().stats
    }

    /// Queue a raw datagram for `to` as if `from` had sent it, bypassing
    /// link conditions. Returns `false` if `to` is not registered.
    pub fn inject(&self, from: PeerHandle, to: PeerHandle, datagram: Vec<u8>) -> bool {
        match self.hub.borrow_mut().inboxes.get_mut(&to) {
            Some(inbox) => {
                inbox.push_back((from, datagram));
                true
            }
            None => false,
        }
    }

    /// Copies of the datagrams pending for `handle`, oldest first.
    pub fn peek_inbox(&self, handle: PeerHandle) -> Vec<(PeerHandle, Vec<u8>)> {
        self.hub
            .borrow()
            .inboxes
            .get(&handle)
            .map(|inbox| inbox.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Discard everything pending for `handle`, returning how many datagrams
    /// were dropped.
    pub fn clear_inbox(&self, handle: PeerHandle) -> usize {
        self.hub
            .borrow_mut()
            .inboxes
            .get_mut(&handle)
            .map_or(0, |inbox| {
                let pending = inbox.len();
                inbox.clear();
                pending
            })
    }
}

/// One peer's endpoint on a [`MemoryNetwork`].
pub struct MemoryChannel {
    local: PeerHandle,
    hub: Rc<RefCell<Hub>>,
}

impl MemoryChannel {
    /// The handle this endpoint sends as.
    pub fn local_handle(&self) -> PeerHandle {
        self.local
    }
}

impl PeerChannel for MemoryChannel {
    fn send(&mut self, peer: PeerHandle, datagram: &[u8]) -> Result<(), ChannelError> {
        if datagram.len() > MAX_DATAGRAM {
            return Err(ChannelError::DatagramTooLarge {
                size: datagram.len(),
                max: MAX_DATAGRAM,
            });
        }
        let mut hub = self.hub.borrow_mut();
        if !hub.inboxes.contains_key(&peer) {
            return Err(ChannelError::UnknownPeer(peer));
        }
        hub.deliver(self.local, peer, datagram);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Option<(usize, PeerHandle)> {
        let mut hub = self.hub.borrow_mut();
        let (from, datagram) = hub.inboxes.get_mut(&self.local)?.pop_front()?;
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Some((len, from))
    }

    fn peer_handles(&self) -> Vec<PeerHandle> {
        self.hub
            .borrow()
            .inboxes
            .keys()
            .copied()
            .filter(|&handle| handle != self.local)
            .collect()
    }

    fn primary_peer_handle(&self) -> Option<PeerHandle> {
        self.hub.borrow().primary
    }
}
