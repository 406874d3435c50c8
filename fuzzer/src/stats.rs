use hailmary_lib::metrics::ActionMetrics;
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::engine::ActionOutcome;

/// Run-wide action counters shared by every engine.
#[derive(Debug)]
pub struct ActionStats {
    started: Instant,
    engines_bootstrapped: AtomicU64,
    pings: AtomicU64,
    ping_failures: AtomicU64,
    pings_skipped: AtomicU64,
    puts: AtomicU64,
    put_failures: AtomicU64,
    gets_found: AtomicU64,
    gets_search_incomplete: AtomicU64,
    gets_not_found: AtomicU64,
    gets_timed_out: AtomicU64,
    provides: AtomicU64,
    find_providers_found: AtomicU64,
    find_providers_not_found: AtomicU64,
    keys_displaced: AtomicU64,
    queue_saturated: AtomicU64,
    queue_empty: AtomicU64,
}

impl Default for ActionStats {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ActionStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            engines_bootstrapped: AtomicU64::new(0),
            pings: AtomicU64::new(0),
            ping_failures: AtomicU64::new(0),
            pings_skipped: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            put_failures: AtomicU64::new(0),
            gets_found: AtomicU64::new(0),
            gets_search_incomplete: AtomicU64::new(0),
            gets_not_found: AtomicU64::new(0),
            gets_timed_out: AtomicU64::new(0),
            provides: AtomicU64::new(0),
            find_providers_found: AtomicU64::new(0),
            find_providers_not_found: AtomicU64::new(0),
            keys_displaced: AtomicU64::new(0),
            queue_saturated: AtomicU64::new(0),
            queue_empty: AtomicU64::new(0),
        }
    }

    pub fn record_bootstrap(&self) {
        bump(&self.engines_bootstrapped);
    }

    /// Counts a queued key pushed out to make room for a fresh one.
    pub fn record_displaced(&self) {
        bump(&self.keys_displaced);
    }

    pub fn record(&self, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Pinged { .. } => bump(&self.pings),
            ActionOutcome::PingFailed { .. } => bump(&self.ping_failures),
            ActionOutcome::NoPeers => bump(&self.pings_skipped),
            ActionOutcome::Stored { enqueued, .. } => {
                bump(&self.puts);
                if !enqueued {
                    bump(&self.queue_saturated);
                }
            }
            ActionOutcome::PutFailed { enqueued, .. } => {
                bump(&self.put_failures);
                if !enqueued {
                    bump(&self.queue_saturated);
                }
            }
            ActionOutcome::Found { .. } => bump(&self.gets_found),
            ActionOutcome::SearchIncomplete { .. } => bump(&self.gets_search_incomplete),
            ActionOutcome::NotFound { .. } => bump(&self.gets_not_found),
            ActionOutcome::TimedOut { .. } => bump(&self.gets_timed_out),
            ActionOutcome::Provided { enqueued, .. } => {
                bump(&self.provides);
                if !enqueued {
                    bump(&self.queue_saturated);
                }
            }
            ActionOutcome::ProvidersFound { .. } => bump(&self.find_providers_found),
            ActionOutcome::NoProviders { .. } => bump(&self.find_providers_not_found),
            ActionOutcome::QueueEmpty { .. } => bump(&self.queue_empty),
            ActionOutcome::Cancelled => {}
        }
    }

    pub fn snapshot(&self) -> ActionMetrics {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ActionMetrics {
            uptime: self.started.elapsed(),
            engines_bootstrapped: load(&self.engines_bootstrapped),
            pings: load(&self.pings),
            ping_failures: load(&self.ping_failures),
            pings_skipped: load(&self.pings_skipped),
            puts: load(&self.puts),
            put_failures: load(&self.put_failures),
            gets_found: load(&self.gets_found),
            gets_search_incomplete: load(&self.gets_search_incomplete),
            gets_not_found: load(&self.gets_not_found),
            gets_timed_out: load(&self.gets_timed_out),
            provides: load(&self.provides),
            find_providers_found: load(&self.find_providers_found),
            find_providers_not_found: load(&self.find_providers_not_found),
            keys_displaced: load(&self.keys_displaced),
            queue_saturated: load(&self.queue_saturated),
            queue_empty: load(&self.queue_empty),
        }
    }
}

pub fn log_summary(metrics: &ActionMetrics) {
    info!(
        "{} actions in {}s: ping {}/{} failed ({} without peers), put {}/{} failed, get found {} incomplete {} missing {} timed out {}, provide {}, find-provide found {} missing {}, queue displaced {} saturated {} empty {}",
        metrics.total_actions(),
        metrics.uptime.as_secs(),
        metrics.ping_failures,
        metrics.pings + metrics.ping_failures,
        metrics.pings_skipped,
        metrics.put_failures,
        metrics.puts + metrics.put_failures,
        metrics.gets_found,
        metrics.gets_search_incomplete,
        metrics.gets_not_found,
        metrics.gets_timed_out,
        metrics.provides,
        metrics.find_providers_found,
        metrics.find_providers_not_found,
        metrics.keys_displaced,
        metrics.queue_saturated,
        metrics.queue_empty,
    );
}

/// Logs a summary every `interval` until cancelled.
pub async fn report(stats: Arc<ActionStats>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // First tick completes immediately
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => log_summary(&stats.snapshot()),
        }
    }
}
