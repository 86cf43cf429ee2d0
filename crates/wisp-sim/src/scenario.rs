//! The simulated mesh.
//!
//! `peers` coordinators share one lossy [`MemoryNetwork`]. The first node is
//! the primary and broadcasts a reliable beacon event once per simulated
//! second. The second node (the mover) travels outward along +X so that,
//! seen from the primary, it crosses every distance band before the run
//! ends.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use glam::DVec3;
use tracing::info;
use wisp_config::{Config, ConfigError, secs};
use wisp_replication::{Coordinator, CoordinatorError, DistanceBand, MemoryTopology};
use wisp_transport::{
    LinkConditions, MemoryChannel, MemoryNetwork, MemoryStats, PeerHandle, ReliableTransport,
    TransportCounters,
};

use crate::fixed_step::FixedStep;

/// Event type broadcast by the primary.
pub const BEACON_EVENT: &str = "wisp.beacon";

/// Distance travelled by the mover over the whole run, as a multiple of the
/// furthest distance.
const MOVER_OVERSHOOT: f64 = 1.25;

const BEACON_INTERVAL: Duration = Duration::from_secs(1);

type SimNode = Coordinator<MemoryChannel, MemoryTopology>;

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A coordinator failed to start or to tick.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

/// End-of-run view of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSummary {
    /// The node's peer handle.
    pub handle: PeerHandle,
    /// Whether its network clock ever synchronized.
    pub synchronized: bool,
    /// Raw network time at the end of the run (seconds).
    pub network_time: f64,
    /// Mean forward latency across its peers.
    pub average_latency: Option<Duration>,
    /// Distinct beacons seen.
    pub beacons_received: u64,
    /// Beacons delivered again after falling out of the duplicate history.
    pub beacon_repeats: u64,
    /// The node's transport counters.
    pub transport: TransportCounters,
}

/// End-of-run report.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Simulated time covered.
    pub elapsed: Duration,
    /// Ticks run.
    pub ticks: u64,
    /// Beacons broadcast by the primary.
    pub beacons_sent: u64,
    /// Bands the primary placed the mover in, in order, without repeats.
    pub mover_bands: Vec<DistanceBand>,
    /// What the simulated links did to the traffic.
    pub network: MemoryStats,
    /// One entry per node, in handle order.
    pub nodes: Vec<NodeSummary>,
}

impl Summary {
    /// Log the summary at `info`.
    pub fn log(&self) {
        info!(
            elapsed = ?self.elapsed,
            ticks = self.ticks,
            beacons_sent = self.beacons_sent,
            mover_bands = ?self.mover_bands,
            sent = self.network.sent,
            dropped = self.network.dropped,
            duplicated = self.network.duplicated,
            reordered = self.network.reordered,
            corrupted = self.network.corrupted,
            "simulation finished"
        );
        for node in &self.nodes {
            info!(
                node = %node.handle,
                synchronized = node.synchronized,
                network_time = node.network_time,
                latency = ?node.average_latency,
                beacons = node.beacons_received,
                beacon_repeats = node.beacon_repeats,
                resends = node.transport.resends,
                duplicates = node.transport.duplicates,
                corrupt = node.transport.corrupt,
                discarded = node.transport.discarded,
                "node summary"
            );
        }
    }
}

#[derive(Debug, Default)]
struct BeaconLog {
    seen: BTreeSet<u64>,
    repeats: u64,
}

/// A running simulation.
pub struct Scenario {
    config: Config,
    network: MemoryNetwork,
    nodes: Vec<SimNode>,
    beacons: Vec<Rc<RefCell<BeaconLog>>>,
    elapsed: Duration,
    ticks: u64,
    next_beacon: Duration,
    beacons_sent: u64,
    mover_speed: f64,
    mover_bands: Vec<DistanceBand>,
}

impl Scenario {
    /// Build and start every node.
    pub fn new(config: &Config) -> Result<Self, ScenarioError> {
        config.validate()?;
        let sim = &config.sim;
        let network = MemoryNetwork::new(
            LinkConditions {
                loss_rate: sim.loss_rate,
                duplicate_rate: sim.duplicate_rate,
                reorder_rate: sim.reorder_rate,
                corrupt_rate: sim.corrupt_rate,
            },
            sim.seed,
        );
        network.set_primary(Some(PeerHandle(1)));

        // Every endpoint must exist before the first coordinator attaches.
        let mut nodes = Vec::with_capacity(sim.peers as usize);
        for id in 1..=u64::from(sim.peers) {
            let handle = PeerHandle(id);
            let transport =
                ReliableTransport::new(network.endpoint(handle), config.transport.clone())?;
            let topology = MemoryTopology::new(network.clone(), handle);
            nodes.push(Coordinator::new(
                transport,
                topology,
                config.replication.clone(),
            )?);
        }

        let mut beacons = Vec::with_capacity(nodes.len());
        for node in &mut nodes {
            node.create()?;
            node.add_event_type(BEACON_EVENT)?;
            let log = Rc::new(RefCell::new(BeaconLog::default()));
            let sink = Rc::clone(&log);
            node.add_listener(BEACON_EVENT, move |event| {
                let Ok(bytes) = <[u8; 8]>::try_from(event.payload) else {
                    tracing::warn!(from = %event.from, len = event.payload.len(), "malformed beacon");
                    return;
                };
                let mut log = sink.borrow_mut();
                if !log.seen.insert(u64::from_le_bytes(bytes)) {
                    log.repeats += 1;
                }
            })?;
            beacons.push(log);
        }

        let mover_speed = if sim.duration_secs > 0.0 {
            config.replication.furthest_distance * MOVER_OVERSHOOT / sim.duration_secs
        } else {
            0.0
        };
        info!(
            peers = sim.peers,
            loss = sim.loss_rate,
            duplicate = sim.duplicate_rate,
            seed = sim.seed,
            mover_speed,
            "simulation ready"
        );

        Ok(Self {
            config: config.clone(),
            network,
            nodes,
            beacons,
            elapsed: Duration::ZERO,
            ticks: 0,
            next_beacon: Duration::ZERO,
            beacons_sent: 0,
            mover_speed,
            mover_bands: Vec::new(),
        })
    }

    /// Run for the configured duration, reporting every report interval.
    pub fn run(&mut self) -> Result<Summary, ScenarioError> {
        let duration = secs(self.config.sim.duration_secs);
        let mut report_every = secs(self.config.debug.report_interval_secs);
        if report_every.is_zero() {
            report_every = duration;
        }
        let mut stepper = FixedStep::from_tick_rate(self.config.sim.tick_rate);

        let mut fed = Duration::ZERO;
        while fed < duration {
            let frame = report_every.min(duration - fed);
            fed += frame;
            stepper.advance(frame, |dt| self.tick(dt))?;
            self.report();
        }
        Ok(self.summary())
    }

    /// Advance every node by one tick.
    pub fn tick(&mut self, dt: Duration) -> Result<(), ScenarioError> {
        if self.elapsed >= self.next_beacon {
            let payload = self.beacons_sent.to_le_bytes();
            let reached = self.nodes[0].broadcast_event(BEACON_EVENT, &payload, true)?;
            tracing::debug!(beacon = self.beacons_sent, reached, "beacon broadcast");
            self.beacons_sent += 1;
            self.next_beacon += BEACON_INTERVAL;
        }

        let x = self.mover_speed * self.elapsed.as_secs_f64();
        self.nodes[1].set_origin(DVec3::new(x, 0.0, 0.0));
        for node in &mut self.nodes {
            let state = format!("{}@{}", node.local_handle(), self.ticks);
            node.set_state(state.into_bytes());
            node.update(dt)?;
        }

        if let Some(band) = self.nodes[0].proxy(self.mover()).map(|proxy| proxy.band())
            && self.mover_bands.last() != Some(&band)
        {
            info!(?band, x, "mover changed band");
            self.mover_bands.push(band);
        }

        self.elapsed += dt;
        self.ticks += 1;
        Ok(())
    }

    fn mover(&self) -> PeerHandle {
        self.nodes[1].local_handle()
    }

    fn report(&self) {
        for node in &self.nodes {
            let counters = node.transport().counters();
            info!(
                elapsed = ?self.elapsed,
                node = %node.local_handle(),
                synchronized = node.is_time_synchronized(),
                network_time = node.compensated_network_time(),
                offset = node.clock().offset(),
                latency = ?node.average_latency(),
                resends = counters.resends,
                usable = node.transport().usable_peers().len(),
                "report"
            );
        }
    }

    /// Snapshot of the run so far.
    pub fn summary(&self) -> Summary {
        Summary {
            elapsed: self.elapsed,
            ticks: self.ticks,
            beacons_sent: self.beacons_sent,
            mover_bands: self.mover_bands.clone(),
            network: self.network.stats(),
            nodes: self
                .nodes
                .iter()
                .zip(&self.beacons)
                .map(|(node, beacons)| {
                    let beacons = beacons.borrow();
                    NodeSummary {
                        handle: node.local_handle(),
                        synchronized: node.is_time_synchronized(),
                        network_time: node.network_time(),
                        average_latency: node.average_latency(),
                        beacons_received: beacons.seen.len() as u64,
                        beacon_repeats: beacons.repeats,
                        transport: *node.transport().counters(),
                    }
                })
                .collect(),
        }
    }

    /// The coordinators, primary first.
    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(peers: u32, duration_secs: f64) -> Config {
        let mut config = Config::default();
        config.sim.peers = peers;
        config.sim.duration_secs = duration_secs;
        config.sim.tick_rate = 100;
        config
    }

    fn perfect(peers: u32, duration_secs: f64) -> Config {
        let mut config = config(peers, duration_secs);
        config.sim.loss_rate = 0.0;
        config.sim.duplicate_rate = 0.0;
        config.sim.reorder_rate = 0.0;
        config.sim.corrupt_rate = 0.0;
        config
    }

    #[test]
    fn test_rejects_single_peer() {
        assert!(matches!(
            Scenario::new(&config(1, 5.0)),
            Err(ScenarioError::Config(ConfigError::Invalid {
                field: "sim.peers",
                ..
            }))
        ));
    }

    #[test]
    fn test_rejects_bad_link_rate() {
        let mut config = config(3, 5.0);
        config.sim.loss_rate = 1.5;
        assert!(matches!(
            Scenario::new(&config),
            Err(ScenarioError::Config(_))
        ));
    }

    #[test]
    fn test_perfect_run() {
        let mut scenario = Scenario::new(&perfect(3, 12.0)).unwrap();
        let summary = scenario.run().unwrap();

        assert_eq!(summary.ticks, 1200);
        assert_eq!(summary.elapsed, Duration::from_secs(12));
        assert_eq!(summary.beacons_sent, 12);
        assert_eq!(summary.network.dropped, 0);

        assert_eq!(summary.nodes[0].beacons_received, 0);
        for node in &summary.nodes {
            assert!(node.synchronized, "{} not synchronized", node.handle);
            assert!(node.average_latency.is_some());
            assert_eq!(node.transport.discarded, 0);
        }
        for node in &summary.nodes[1..] {
            assert_eq!(node.beacons_received, summary.beacons_sent);
            assert_eq!(node.beacon_repeats, 0);
            assert!((node.network_time - summary.nodes[0].network_time).abs() < 0.02);
        }
    }

    #[test]
    fn test_mover_crosses_every_band() {
        let mut scenario = Scenario::new(&perfect(2, 12.0)).unwrap();
        let summary = scenario.run().unwrap();
        assert_eq!(
            summary.mover_bands,
            [
                DistanceBand::Near,
                DistanceBand::Far,
                DistanceBand::Distant,
                DistanceBand::OutOfRange,
            ]
        );
        let primary = &scenario.nodes()[0];
        let mover = primary.proxy(PeerHandle(2)).unwrap();
        assert!(mover.origin().unwrap().x >= 120.0);
    }

    #[test]
    fn test_lossy_run_delivers_beacons() {
        let mut config = config(4, 15.0);
        config.sim.loss_rate = 0.2;
        config.sim.corrupt_rate = 0.0;
        let mut scenario = Scenario::new(&config).unwrap();
        let summary = scenario.run().unwrap();

        assert!(summary.network.dropped > 0);
        for node in &summary.nodes[1..] {
            // The last beacons may still be waiting for a resend.
            assert!(node.beacons_received >= summary.beacons_sent - 2);
            assert!(node.beacons_received <= summary.beacons_sent);
        }
    }

    #[test]
    fn test_same_seed_same_run() {
        let mut config = config(3, 5.0);
        config.sim.loss_rate = 0.1;
        config.sim.seed = 1234;
        let first = Scenario::new(&config).unwrap().run().unwrap();
        let second = Scenario::new(&config).unwrap().run().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_duration_runs_nothing() {
        let mut scenario = Scenario::new(&perfect(2, 0.0)).unwrap();
        let summary = scenario.run().unwrap();
        assert_eq!(summary.ticks, 0);
        assert_eq!(summary.beacons_sent, 0);
    }
}
