//! State replication over the reliable transport: network clock sync,
//! per-peer proxies, distance-banded state sends, event dispatch, and
//! latency statistics.

pub mod clock;
pub mod coordinator;
pub mod events;
pub mod interest;
pub mod latency;
pub mod messages;
pub mod proxy;
pub mod topology;


pub use clock::{TimeAdjustment, TimeSync, compute_time_adjustment};
pub use coordinator::{Coordinator, CoordinatorError, Lifecycle};
pub use events::{EventError, EventListener, EventRegistry, ReceivedEvent};
pub use interest::{DistanceBand, DistanceBands};
pub use latency::{LatencyStats, LatencyTracker};
pub use messages::{MessageError, PROTOCOL_VERSION, ReplicationMessage};
pub use proxy::{ProxyCounters, ReplicatorProxy};
pub use topology::{MembershipEvent, MemoryTopology, Topology, TopologyError};
