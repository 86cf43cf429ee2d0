//! The replication coordinator.
//!
//! One coordinator runs per node. It owns the node's [`ReliableTransport`]
//! and [`Topology`], keeps a [`ReplicatorProxy`] per remote node, and on each
//! [`Coordinator::update`]:
//!
//! 1. applies membership changes reported by the topology,
//! 2. advances the local clock and the transport,
//! 3. drains the transport, routing states to proxies, events to
//!    listeners, and pings/pongs into the clock and latency trackers,
//! 4. folds the tick's clock samples into the network time,
//! 5. sends state to each proxy at the cadence of its distance band,
//! 6. pings each proxy at the ping cadence.
//!
//! Nothing in `update` fails the tick once the coordinator is active:
//! undecodable payloads, send failures, and topology errors are logged and
//! skipped.

use std::collections::BTreeMap;
use std::time::Duration;

use glam::DVec3;
use wisp_config::{ConfigError, ReplicationConfig};
use wisp_transport::{
    Delivery, MAX_PAYLOAD, PeerChannel, PeerHandle, ReliableTransport, TransportError,
};

use crate::clock::TimeSync;
use crate::events::{EventError, EventRegistry, ReceivedEvent};
use crate::interest::DistanceBands;
use crate::latency::{LatencyStats, LatencyTracker};
use crate::messages::{self, MessageError, ReplicationMessage};
use crate::proxy::ReplicatorProxy;
use crate::topology::{MembershipEvent, Topology, TopologyError};

/// Longest round trip (seconds) accepted from a pong. Anything larger comes
/// from a garbled or foreign timestamp.
const MAX_ROUND_TRIP: f64 = 60.0;

/// Coordinator lifecycle: `Created -> Active -> Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, `create` not yet called.
    Created,
    /// Bound to its topology; `update` may run.
    Active,
    /// Torn down; no further updates.
    Destroyed,
}

/// Errors returned by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The operation needs an active coordinator.
    #[error("coordinator is {0:?}, not active")]
    NotActive(Lifecycle),

    /// `create` was called more than once.
    #[error("coordinator cannot be created from state {0:?}")]
    AlreadyCreated(Lifecycle),

    /// No primary is designated.
    #[error("no primary node is designated")]
    NoPrimary,

    /// The local node is the primary, so there is nobody to send to.
    #[error("the local node is the primary")]
    PrimaryIsLocal,

    /// The target peer is faulty and cannot take reliable sends.
    #[error("peer {0} is faulty")]
    PeerFaulty(PeerHandle),

    /// Topology error.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message codec error.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Event registry error.
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Per-node replication coordinator.
pub struct Coordinator<C: PeerChannel, T: Topology> {
    transport: ReliableTransport<C>,
    topology: T,
    config: ReplicationConfig,
    bands: DistanceBands,
    lifecycle: Lifecycle,
    events: EventRegistry,
    proxies: BTreeMap<PeerHandle, ReplicatorProxy>,
    local_state: Option<Vec<u8>>,
    origin: DVec3,
    clock: TimeSync,
}

impl<C: PeerChannel, T: Topology> Coordinator<C, T> {
    /// A coordinator in the `Created` state.
    pub fn new(
        transport: ReliableTransport<C>,
        topology: T,
        config: ReplicationConfig,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        Ok(Self {
            transport,
            topology,
            bands: DistanceBands::from_config(&config),
            config,
            lifecycle: Lifecycle::Created,
            events: EventRegistry::new(),
            proxies: BTreeMap::new(),
            local_state: None,
            origin: DVec3::ZERO,
            clock: TimeSync::new(),
        })
    }

    /// Bind the topology, reset the clock, and create a proxy for every
    /// remote node already in the mesh.
    ///
    /// On error the coordinator stays `Created` and must not be updated.
    pub fn create(&mut self) -> Result<(), CoordinatorError> {
        if self.lifecycle != Lifecycle::Created {
            return Err(CoordinatorError::AlreadyCreated(self.lifecycle));
        }
        self.topology.attach()?;
        self.clock.reset();

        for index in 0..self.topology.node_count() {
            if let Some(handle) = self.topology.node_handle(index) {
                self.node_connected(handle);
            }
        }

        self.lifecycle = Lifecycle::Active;
        tracing::info!(
            local = %self.topology.local_handle(),
            peers = self.proxies.len(),
            "replication coordinator active"
        );
        Ok(())
    }

    /// Tear down: drop every proxy. Further updates fail with
    /// [`CoordinatorError::NotActive`].
    pub fn destroy(&mut self) {
        if self.lifecycle == Lifecycle::Destroyed {
            return;
        }
        self.proxies.clear();
        self.lifecycle = Lifecycle::Destroyed;
        tracing::info!(local = %self.topology.local_handle(), "replication coordinator destroyed");
    }

    fn ensure_active(&self) -> Result<(), CoordinatorError> {
        match self.lifecycle {
            Lifecycle::Active => Ok(()),
            other => Err(CoordinatorError::NotActive(other)),
        }
    }

    /// Run one tick of length `dt`.
    pub fn update(&mut self, dt: Duration) -> Result<(), CoordinatorError> {
        self.ensure_active()?;

        if let Err(e) = self.topology.update(dt) {
            tracing::warn!("topology update failed: {e}");
        }
        while let Some(event) = self.topology.poll_membership() {
            match event {
                MembershipEvent::Connected(handle) => {
                    self.node_connected(handle);
                }
                MembershipEvent::Disconnected(handle) => {
                    self.node_disconnected(handle);
                }
            }
        }

        self.clock.advance(dt);
        let local = self.topology.local_handle();
        let reference = self
            .topology
            .primary_handle()
            .is_none_or(|primary| primary == local);
        self.clock.set_reference(reference);

        self.transport.update(dt);
        while let Some(delivery) = self.transport.receive() {
            self.handle_delivery(delivery);
        }

        self.clock.resolve(
            dt,
            self.config.time_synchronization,
            self.config.time_variance_threshold,
        );

        self.send_states(dt);
        self.send_pings(dt);
        Ok(())
    }

    // --- Membership ---

    /// Create a proxy for `handle`. Returns `false` for the local handle or
    /// a peer that already has one.
    pub fn node_connected(&mut self, handle: PeerHandle) -> bool {
        if handle == self.topology.local_handle() || self.proxies.contains_key(&handle) {
            return false;
        }
        self.proxies.insert(handle, ReplicatorProxy::new(handle));
        tracing::info!(peer = %handle, "node connected, proxy created");
        true
    }

    /// Drop the proxy for `handle`. Returns `false` if there was none.
    pub fn node_disconnected(&mut self, handle: PeerHandle) -> bool {
        if self.proxies.remove(&handle).is_none() {
            return false;
        }
        tracing::info!(peer = %handle, "node disconnected, proxy dropped");
        true
    }

    // --- Receive path ---

    fn handle_delivery(&mut self, delivery: Delivery) {
        let Delivery { peer, payload, .. } = delivery;
        let message = match messages::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%peer, len = payload.len(), "dropped undecodable payload: {e}");
                return;
            }
        };

        match message {
            ReplicationMessage::State {
                sent_local,
                origin,
                snapshot,
            } => {
                let Some(proxy) = self.proxies.get_mut(&peer) else {
                    tracing::debug!(%peer, "state from unknown peer dropped");
                    return;
                };
                if !proxy.apply_state(sent_local, DVec3::from_array(origin), snapshot) {
                    tracing::trace!(%peer, sent_local, "stale state dropped");
                }
            }
            ReplicationMessage::Event {
                type_index,
                payload,
            } => self.handle_event(peer, type_index, &payload),
            ReplicationMessage::Ping {
                sequence,
                sent_local,
                sent_network,
                origin,
                event_table,
            } => self.handle_ping(peer, sequence, sent_local, sent_network, origin, event_table),
            ReplicationMessage::Pong {
                sequence,
                sent_local,
                sent_network,
                responder_network,
                origin,
            } => self.handle_pong(
                peer,
                sequence,
                sent_local,
                sent_network,
                responder_network,
                origin,
            ),
        }
    }

    fn handle_event(&mut self, peer: PeerHandle, type_index: u16, payload: &[u8]) {
        let Some(proxy) = self.proxies.get_mut(&peer) else {
            tracing::debug!(%peer, type_index, "event from unknown peer dropped");
            return;
        };
        if proxy.event_table_mismatch() {
            proxy.counters_mut().events_dropped += 1;
            tracing::debug!(%peer, type_index, "event dropped, event tables differ");
            return;
        }
        match self.events.dispatch(type_index, peer, payload) {
            Ok(listeners) => {
                proxy.counters_mut().events_received += 1;
                tracing::trace!(%peer, type_index, listeners, "event dispatched");
            }
            Err(e) => {
                proxy.counters_mut().events_dropped += 1;
                tracing::warn!(%peer, "dropped event: {e}");
            }
        }
    }

    fn handle_ping(
        &mut self,
        peer: PeerHandle,
        sequence: u32,
        sent_local: f64,
        sent_network: f64,
        origin: [f64; 3],
        event_table: u64,
    ) {
        if let Some(proxy) = self.proxies.get_mut(&peer) {
            proxy.set_origin(DVec3::from_array(origin));
            let mismatch = event_table != self.events.fingerprint();
            if proxy.set_event_table_mismatch(mismatch) {
                if mismatch {
                    tracing::warn!(%peer, "peer event-type table differs, dropping its events");
                } else {
                    tracing::info!(%peer, "peer event-type table matches again");
                }
            }
        }

        let pong = ReplicationMessage::Pong {
            sequence,
            sent_local,
            sent_network,
            responder_network: self.clock.network_secs(),
            origin: self.origin.to_array(),
        };
        if let Err(e) = transmit(&mut self.transport, peer, &pong, false) {
            tracing::warn!(%peer, sequence, "pong send failed: {e}");
        }
    }

    fn handle_pong(
        &mut self,
        peer: PeerHandle,
        sequence: u32,
        sent_local: f64,
        sent_network: f64,
        responder_network: f64,
        origin: [f64; 3],
    ) {
        let Some(proxy) = self.proxies.get_mut(&peer) else {
            tracing::debug!(%peer, sequence, "pong from unknown peer dropped");
            return;
        };
        proxy.set_origin(DVec3::from_array(origin));
        proxy.counters_mut().pongs_received += 1;

        let now_local = self.clock.local_secs();
        let rtt = (now_local - sent_local).max(0.0);
        if rtt > MAX_ROUND_TRIP || !responder_network.is_finite() || !sent_network.is_finite() {
            tracing::warn!(%peer, sequence, rtt, "pong with implausible timestamps ignored");
            return;
        }

        if self.config.time_synchronization
            && !self.clock.is_reference()
            && self.topology.primary_handle() == Some(peer)
        {
            self.clock
                .record_sample(responder_network + rtt / 2.0 - now_local);
        }

        let (forward, reverse) = if self.clock.is_synchronized() {
            LatencyTracker::split(
                rtt,
                Some(responder_network - sent_network),
                Some(self.clock.network_secs() - responder_network),
            )
        } else {
            LatencyTracker::split(rtt, None, None)
        };
        proxy
            .latency_mut()
            .record(forward, reverse, Duration::from_secs_f64(rtt));
        tracing::trace!(%peer, sequence, rtt, "pong received");
    }

    // --- Send path ---

    fn send_states(&mut self, dt: Duration) {
        let sent_local = self.clock.local_secs();
        let origin = self.origin.to_array();

        for (&peer, proxy) in self.proxies.iter_mut() {
            let band = self.bands.classify_origins(self.origin, proxy.origin());
            if proxy.set_band(band) {
                tracing::debug!(%peer, ?band, "distance band changed");
            }
            if !self.config.send_state {
                continue;
            }
            let Some(interval) = band.state_interval(&self.config) else {
                proxy.reset_state_cadence();
                continue;
            };
            if !proxy.state_due(dt, interval) {
                continue;
            }
            if self.transport.is_faulty(peer) {
                tracing::debug!(%peer, "skipped state send to faulty peer");
                continue;
            }

            let snapshot = if band.sends_snapshot() {
                self.local_state.clone()
            } else {
                None
            };
            let full = snapshot.is_some();
            let message = ReplicationMessage::State {
                sent_local,
                origin,
                snapshot,
            };
            match transmit(&mut self.transport, peer, &message, false) {
                Ok(()) if full => proxy.counters_mut().states_sent += 1,
                Ok(()) => proxy.counters_mut().partial_states_sent += 1,
                Err(e) => tracing::warn!(%peer, "state send failed: {e}"),
            }
        }
    }

    fn send_pings(&mut self, dt: Duration) {
        let interval = self.config.ping_interval();
        let sent_local = self.clock.local_secs();
        let sent_network = self.clock.network_secs();
        let origin = self.origin.to_array();
        let event_table = self.events.fingerprint();

        for (&peer, proxy) in self.proxies.iter_mut() {
            if !proxy.ping_due(dt, interval) {
                continue;
            }
            let sequence = proxy.next_ping_sequence();
            let ping = ReplicationMessage::Ping {
                sequence,
                sent_local,
                sent_network,
                origin,
                event_table,
            };
            match transmit(&mut self.transport, peer, &ping, false) {
                Ok(()) => proxy.counters_mut().pings_sent += 1,
                Err(e) => tracing::warn!(%peer, sequence, "ping send failed: {e}"),
            }
        }
    }

    /// Send an event to every proxy's peer. With `in_order` the event goes
    /// over the reliable channel and faulty peers are skipped; otherwise it
    /// is sent once, unreliably. Returns the number of peers it was handed
    /// to.
    pub fn broadcast_event(
        &mut self,
        tag: &'static str,
        payload: &[u8],
        in_order: bool,
    ) -> Result<usize, CoordinatorError> {
        self.ensure_active()?;
        let bytes = self.encode_event(tag, payload)?;

        let mut sent = 0;
        for &peer in self.proxies.keys() {
            if in_order && self.transport.is_faulty(peer) {
                tracing::debug!(%peer, tag, "skipped reliable event to faulty peer");
                continue;
            }
            match self.transport.send(peer, &bytes, in_order) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(%peer, tag, "event send failed: {e}"),
            }
        }
        Ok(sent)
    }

    /// Send an event to the primary node only.
    pub fn send_event_to_primary(
        &mut self,
        tag: &'static str,
        payload: &[u8],
        in_order: bool,
    ) -> Result<PeerHandle, CoordinatorError> {
        self.ensure_active()?;
        let primary = self
            .topology
            .primary_handle()
            .ok_or(CoordinatorError::NoPrimary)?;
        if primary == self.topology.local_handle() {
            return Err(CoordinatorError::PrimaryIsLocal);
        }
        if in_order && self.transport.is_faulty(primary) {
            return Err(CoordinatorError::PeerFaulty(primary));
        }
        let bytes = self.encode_event(tag, payload)?;
        self.transport.send(primary, &bytes, in_order)?;
        Ok(primary)
    }

    fn encode_event(&self, tag: &'static str, payload: &[u8]) -> Result<Vec<u8>, CoordinatorError> {
        let type_index = self
            .events
            .index_of(tag)
            .ok_or(EventError::Unregistered(tag))?;
        let bytes = messages::encode(&ReplicationMessage::Event {
            type_index,
            payload: payload.to_vec(),
        })?;
        if bytes.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_PAYLOAD,
            }
            .into());
        }
        Ok(bytes)
    }

    // --- Events ---

    /// Append an event type to the shared table and return its index.
    pub fn add_event_type(&mut self, tag: &'static str) -> Result<u16, CoordinatorError> {
        Ok(self.events.add_type(tag)?)
    }

    /// Clear the event-type table and every listener.
    pub fn remove_all_event_types(&mut self) {
        self.events.clear();
    }

    /// Register a listener for received events of type `tag`.
    pub fn add_listener(
        &mut self,
        tag: &'static str,
        listener: impl FnMut(&ReceivedEvent<'_>) + 'static,
    ) -> Result<(), CoordinatorError> {
        Ok(self.events.add_listener(tag, listener)?)
    }

    /// The event-type table.
    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    // --- Local state ---

    /// Replace this node's replicated snapshot.
    pub fn set_state(&mut self, snapshot: impl Into<Vec<u8>>) {
        self.local_state = Some(snapshot.into());
    }

    /// This node's replicated snapshot.
    pub fn state(&self) -> Option<&[u8]> {
        self.local_state.as_deref()
    }

    /// Move this node's origin.
    pub fn set_origin(&mut self, origin: DVec3) {
        self.origin = origin;
    }

    /// This node's origin.
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    // --- Time ---

    /// Local clock: the sum of every `dt` since `create`.
    pub fn local_time(&self) -> Duration {
        self.clock.local()
    }

    /// Raw network time in seconds.
    pub fn network_time(&self) -> f64 {
        self.clock.network_secs()
    }

    /// Network time in seconds, slewed so it never jumps for small
    /// corrections.
    pub fn compensated_network_time(&self) -> f64 {
        self.clock.compensated_secs()
    }

    /// Whether the offset variance has reached the configured threshold.
    pub fn is_time_synchronized(&self) -> bool {
        self.clock.is_synchronized()
    }

    /// Clock state, for diagnostics.
    pub fn clock(&self) -> &TimeSync {
        &self.clock
    }

    // --- Latency ---

    /// Latency aggregate over peers with at least one completed round trip.
    pub fn latency_stats(&self) -> Option<LatencyStats> {
        LatencyStats::collect(self.proxies.values().map(ReplicatorProxy::latency))
    }

    /// Mean forward latency.
    pub fn average_latency(&self) -> Option<Duration> {
        self.latency_stats().map(|stats| stats.average)
    }

    /// Lowest forward latency.
    pub fn best_latency(&self) -> Option<Duration> {
        self.latency_stats().map(|stats| stats.best)
    }

    /// Highest forward latency.
    pub fn worst_latency(&self) -> Option<Duration> {
        self.latency_stats().map(|stats| stats.worst)
    }

    /// Mean reverse latency.
    pub fn average_reverse_latency(&self) -> Option<Duration> {
        self.latency_stats().map(|stats| stats.reverse_average)
    }

    /// Lowest reverse latency.
    pub fn best_reverse_latency(&self) -> Option<Duration> {
        self.latency_stats().map(|stats| stats.reverse_best)
    }

    /// Highest reverse latency.
    pub fn worst_reverse_latency(&self) -> Option<Duration> {
        self.latency_stats().map(|stats| stats.reverse_worst)
    }

    // --- Accessors ---

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Handle of the local node.
    pub fn local_handle(&self) -> PeerHandle {
        self.topology.local_handle()
    }

    /// Proxy for `handle`.
    pub fn proxy(&self, handle: PeerHandle) -> Option<&ReplicatorProxy> {
        self.proxies.get(&handle)
    }

    /// Every proxy, in ascending handle order.
    pub fn proxies(&self) -> impl Iterator<Item = &ReplicatorProxy> {
        self.proxies.values()
    }

    /// Current configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Replace the configuration between ticks.
    pub fn set_config(&mut self, config: ReplicationConfig) -> Result<(), CoordinatorError> {
        config.validate()?;
        self.bands = DistanceBands::from_config(&config);
        self.config = config;
        Ok(())
    }

    /// The owned transport.
    pub fn transport(&self) -> &ReliableTransport<C> {
        &self.transport
    }

    /// Mutable access to the owned transport.
    pub fn transport_mut(&mut self) -> &mut ReliableTransport<C> {
        &mut self.transport
    }

    /// The owned topology.
    pub fn topology(&self) -> &T {
        &self.topology
    }

    /// Mutable access to the owned topology.
    pub fn topology_mut(&mut self) -> &mut T {
        &mut self.topology
    }
}

fn transmit<C: PeerChannel>(
    transport: &mut ReliableTransport<C>,
    peer: PeerHandle,
    message: &ReplicationMessage,
    reliable: bool,
) -> Result<(), CoordinatorError> {
    let bytes = messages::encode(message)?;
    transport.send(peer, &bytes, reliable)?;
    Ok(())
}
