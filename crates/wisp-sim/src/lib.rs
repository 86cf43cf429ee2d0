//! Simulation driver for the wisp stack: several in-process peers on a lossy
//! in-memory network, stepped at a fixed rate in simulated time.

pub mod fixed_step;
pub mod scenario;

pub use fixed_step::FixedStep;
pub use scenario::{BEACON_EVENT, NodeSummary, Scenario, ScenarioError, Summary};
