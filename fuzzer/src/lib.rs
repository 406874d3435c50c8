//! Hailmary DHT fuzzer
//!
//! Provisions a set of local DHT nodes, gives each a handful of random peers
//! and then drives every node with randomly chosen actions. Keys written by
//! PUT and PROVIDE circulate through two shared [`queue::WorkQueue`]s so GET
//! and FIND-PROVIDE mostly look up data that really exists.

macro_rules! log_info {
    ($address:expr, $($arg:tt)*) => ({
        log::info!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_warn {
    ($address:expr, $($arg:tt)*) => ({
        log::warn!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_error {
    ($address:expr, $($arg:tt)*) => ({
        log::error!("[{}] {}", $address, format_args!($($arg)*));
    })
}

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod provision;
pub mod queue;
pub mod stats;
pub mod topology;

pub use config::FuzzConfig;
pub use engine::{
    run_engines, run_node, Action, ActionEngine, ActionOutcome, EngineContext, EngineSettings,
};
pub use error::{FatalKind, FuzzError};
pub use provision::{provision_all, provision_node, LiveNode, Node};
pub use queue::{WorkQueue, WorkQueues};
pub use stats::ActionStats;
pub use topology::{bootstrap_peers, pick_peers};
