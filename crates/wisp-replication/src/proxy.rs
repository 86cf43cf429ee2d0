//! Coordinator-side mirror of one remote peer.

use std::time::Duration;

use glam::DVec3;
use wisp_transport::PeerHandle;

use crate::interest::DistanceBand;
use crate::latency::LatencyTracker;

/// Per-proxy traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyCounters {
    /// State messages with a snapshot sent to the peer.
    pub states_sent: u64,
    /// Origin-only state messages sent to the peer.
    pub partial_states_sent: u64,
    /// State messages accepted from the peer.
    pub states_received: u64,
    /// State messages from the peer dropped as older than the ghost.
    pub stale_states: u64,
    /// Pings sent to the peer.
    pub pings_sent: u64,
    /// Pongs received from the peer.
    pub pongs_received: u64,
    /// Events from the peer handed to listeners.
    pub events_received: u64,
    /// Events from the peer dropped because the event tables differ.
    pub events_dropped: u64,
}

/// One remote peer as known to the coordinator: its ghost state, origin,
/// latency, and send cadence bookkeeping.
#[derive(Debug, Clone)]
pub struct ReplicatorProxy {
    handle: PeerHandle,
    ghost: Option<Vec<u8>>,
    last_state_local: Option<f64>,
    origin: Option<DVec3>,
    band: DistanceBand,
    since_state: Option<Duration>,
    since_ping: Option<Duration>,
    next_ping: u32,
    latency: LatencyTracker,
    event_table_mismatch: bool,
    counters: ProxyCounters,
}

impl ReplicatorProxy {
    /// A proxy with no ghost and an unknown origin. The first state and
    /// ping go out on the next tick.
    pub fn new(handle: PeerHandle) -> Self {
        Self {
            handle,
            ghost: None,
            last_state_local: None,
            origin: None,
            band: DistanceBand::Near,
            since_state: None,
            since_ping: None,
            next_ping: 0,
            latency: LatencyTracker::default(),
            event_table_mismatch: false,
            counters: ProxyCounters::default(),
        }
    }

    /// The peer this proxy mirrors.
    pub fn handle(&self) -> PeerHandle {
        self.handle
    }

    /// Last snapshot received from the peer.
    pub fn ghost(&self) -> Option<&[u8]> {
        self.ghost.as_deref()
    }

    /// Last origin reported by the peer.
    pub fn origin(&self) -> Option<DVec3> {
        self.origin
    }

    /// Band the peer was in on the last state pass.
    pub fn band(&self) -> DistanceBand {
        self.band
    }

    /// Latency to and from the peer.
    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    /// Whether the peer's last ping carried a different event-table
    /// fingerprint.
    pub fn event_table_mismatch(&self) -> bool {
        self.event_table_mismatch
    }

    /// Traffic counters.
    pub fn counters(&self) -> &ProxyCounters {
        &self.counters
    }

    pub(crate) fn counters_mut(&mut self) -> &mut ProxyCounters {
        &mut self.counters
    }

    pub(crate) fn latency_mut(&mut self) -> &mut LatencyTracker {
        &mut self.latency
    }

    pub(crate) fn set_origin(&mut self, origin: DVec3) {
        self.origin = Some(origin);
    }

    /// Record a band and report whether it changed.
    pub(crate) fn set_band(&mut self, band: DistanceBand) -> bool {
        let changed = self.band != band;
        self.band = band;
        changed
    }

    /// Record the mismatch flag and report whether it changed.
    pub(crate) fn set_event_table_mismatch(&mut self, mismatch: bool) -> bool {
        let changed = self.event_table_mismatch != mismatch;
        self.event_table_mismatch = mismatch;
        changed
    }

    /// Apply a state message. A message sent earlier than the one that
    /// produced the current ghost is dropped; returns `false` in that case.
    pub(crate) fn apply_state(
        &mut self,
        sent_local: f64,
        origin: DVec3,
        snapshot: Option<Vec<u8>>,
    ) -> bool {
        if self.last_state_local.is_some_and(|last| sent_local < last) {
            self.counters.stale_states += 1;
            return false;
        }
        self.last_state_local = Some(sent_local);
        self.origin = Some(origin);
        if let Some(snapshot) = snapshot {
            self.ghost = Some(snapshot);
        }
        self.counters.states_received += 1;
        true
    }

    /// Advance the state cadence by `dt`; `true` when a send is due.
    pub(crate) fn state_due(&mut self, dt: Duration, interval: Duration) -> bool {
        cadence_due(&mut self.since_state, dt, interval)
    }

    /// Forget the state cadence so the next in-range pass sends at once.
    pub(crate) fn reset_state_cadence(&mut self) {
        self.since_state = None;
    }

    /// Advance the ping cadence by `dt`; `true` when a ping is due.
    pub(crate) fn ping_due(&mut self, dt: Duration, interval: Duration) -> bool {
        cadence_due(&mut self.since_ping, dt, interval)
    }

    /// Sequence number for the next ping.
    pub(crate) fn next_ping_sequence(&mut self) -> u32 {
        let sequence = self.next_ping;
        self.next_ping = self.next_ping.wrapping_add(1);
        sequence
    }
}

/// `None` means nothing was sent yet, so a send is due immediately. After a
/// send the interval is subtracted, carrying the remainder so the average
/// cadence stays exact; if a long tick left a whole interval or more, the
/// accumulator restarts at zero.
fn cadence_due(since: &mut Option<Duration>, dt: Duration, interval: Duration) -> bool {
    match since {
        None => {
            *since = Some(Duration::ZERO);
            true
        }
        Some(elapsed) => {
            *elapsed += dt;
            if *elapsed < interval {
                return false;
            }
            *elapsed -= interval;
            if *elapsed >= interval {
                *elapsed = Duration::ZERO;
            }
            true
        }
    }
}
