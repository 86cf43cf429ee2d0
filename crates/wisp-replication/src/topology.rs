//! Network topology: who is in the mesh, who is primary, and membership
//! changes since the last tick.
//!
//! The coordinator polls [`Topology::poll_membership`] at the start of each
//! tick rather than being called back re-entrantly.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use wisp_transport::{MemoryNetwork, PeerHandle};

/// A change in mesh membership reported by a [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A remote node joined.
    Connected(PeerHandle),
    /// A remote node left.
    Disconnected(PeerHandle),
}

/// Errors reported by a [`Topology`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// The local handle is not (or no longer) part of the network.
    #[error("local handle {0} is not registered with the network")]
    NotRegistered(PeerHandle),

    /// `update` was called before `attach`.
    #[error("topology is not attached")]
    NotAttached,
}

/// Membership and leadership view consumed by the coordinator.
pub trait Topology {
    /// Bind to the network. Called once by the coordinator's `create`.
    fn attach(&mut self) -> Result<(), TopologyError>;

    /// Handle of the local node.
    fn local_handle(&self) -> PeerHandle;

    /// Handle of the designated primary node, if any.
    fn primary_handle(&self) -> Option<PeerHandle>;

    /// Number of nodes in the mesh, the local node included.
    fn node_count(&self) -> usize;

    /// Handle of the node at `index`, in ascending handle order.
    fn node_handle(&self, index: usize) -> Option<PeerHandle>;

    /// Refresh membership. Called once per tick before the coordinator runs.
    fn update(&mut self, dt: Duration) -> Result<(), TopologyError>;

    /// Next queued membership change, oldest first.
    fn poll_membership(&mut self) -> Option<MembershipEvent>;
}

/// Topology derived from the member list of a [`MemoryNetwork`].
pub struct MemoryTopology {
    network: MemoryNetwork,
    local: PeerHandle,
    known: BTreeSet<PeerHandle>,
    pending: VecDeque<MembershipEvent>,
    attached: bool,
}

impl MemoryTopology {
    /// Topology for the node `local` on `network`.
    pub fn new(network: MemoryNetwork, local: PeerHandle) -> Self {
        Self {
            network,
            local,
            known: BTreeSet::new(),
            pending: VecDeque::new(),
            attached: false,
        }
    }

    /// The underlying network.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    fn remote_members(&self) -> BTreeSet<PeerHandle> {
        self.network
            .members()
            .into_iter()
            .filter(|&handle| handle != self.local)
            .collect()
    }
}

impl Topology for MemoryTopology {
    fn attach(&mut self) -> Result<(), TopologyError> {
        if !self.network.contains(self.local) {
            return Err(TopologyError::NotRegistered(self.local));
        }
        // Nodes already present are enumerated by the coordinator through
        // `node_handle`, so they are not queued as connections.
        self.known = self.remote_members();
        self.pending.clear();
        self.attached = true;
        Ok(())
    }

    fn local_handle(&self) -> PeerHandle {
        self.local
    }

    fn primary_handle(&self) -> Option<PeerHandle> {
        self.network.primary()
    }

    fn node_count(&self) -> usize {
        self.network.members().len()
    }

    fn node_handle(&self, index: usize) -> Option<PeerHandle> {
        self.network.members().get(index).copied()
    }

    fn update(&mut self, _dt: Duration) -> Result<(), TopologyError> {
        if !self.attached {
            return Err(TopologyError::NotAttached);
        }
        if !self.network.contains(self.local) {
            return Err(TopologyError::NotRegistered(self.local));
        }

        let current = self.remote_members();
        for &handle in current.difference(&self.known) {
            self.pending.push_back(MembershipEvent::Connected(handle));
        }
        for &handle in self.known.difference(&current) {
            self.pending.push_back(MembershipEvent::Disconnected(handle));
        }
        self.known = current;
        Ok(())
    }

    fn poll_membership(&mut self) -> Option<MembershipEvent> {
        self.pending.pop_front()
    }
}
