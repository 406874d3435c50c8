//! Integration testing framework for the fuzzer
//!
//! Runs real `DhtNode`s over an in-memory network so whole fuzzing runs can
//! be started, disturbed and stopped deterministically:
//!
//! - message routing between simulated nodes
//! - node failures, latency and message loss
//! - engines driven by the production `run_engines` loop

pub mod network_simulator;
pub mod test_harness;

pub use network_simulator::{NetworkSimulator, SimulatedNetworkClient, SimulatorMessage};
pub use test_harness::{SimNode, TestHarness};
