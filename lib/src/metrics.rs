use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of what the fuzzer has done so far.
///
/// Counters are cumulative since the start of the run and summed across
/// every node's action engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ActionMetrics {
    /// Time since the run started.
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,

    /// Number of engines that finished bootstrapping.
    pub engines_bootstrapped: u64,

    pub pings: u64,
    pub ping_failures: u64,
    /// PINGs drawn by an engine with an empty peer pool.
    pub pings_skipped: u64,

    pub puts: u64,
    pub put_failures: u64,

    /// GETs that returned a value.
    pub gets_found: u64,
    pub gets_search_incomplete: u64,
    pub gets_not_found: u64,
    pub gets_timed_out: u64,

    pub provides: u64,

    /// FIND-PROVIDE calls that returned at least one provider.
    pub find_providers_found: u64,
    pub find_providers_not_found: u64,

    /// Queued keys pushed out of a full queue by fresh ones.
    pub keys_displaced: u64,
    /// Fresh keys that could not be enqueued because every slot stayed
    /// checked out.
    pub queue_saturated: u64,
    /// Consumers that gave up waiting on an empty queue.
    pub queue_empty: u64,
}

impl ActionMetrics {
    /// Total actions that ran to completion.
    pub fn total_actions(&self) -> u64 {
        self.pings
            + self.ping_failures
            + self.pings_skipped
            + self.puts
            + self.put_failures
            + self.gets_found
            + self.gets_search_incomplete
            + self.gets_not_found
            + self.gets_timed_out
            + self.provides
            + self.find_providers_found
            + self.find_providers_not_found
    }
}
