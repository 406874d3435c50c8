use std::str::FromStr;
use std::time::Duration;

use crate::error::{FuzzError, Result};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::topology::DEFAULT_CONNECTIONS;

/// Configuration for a fuzzing run
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzConfig {
    pub node_count: usize,
    pub host: String,
    pub base_port: u16,
    /// Outbound connections each node makes before fuzzing.
    pub connections: usize,
    pub queue_capacity: usize,
    /// Timeout for ping, get and find-providers calls.
    pub call_timeout: Duration,
    /// How long an engine waits on a full or empty queue.
    pub queue_wait: Duration,
    pub replication: usize,
    pub maintenance_interval: Duration,
    pub stats_interval: Duration,
    /// Side port for the diagnostics listener; `None` disables it.
    pub diagnostic_address: Option<String>,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            node_count: 50,
            host: "127.0.0.1".to_string(),
            base_port: 5000,
            connections: DEFAULT_CONNECTIONS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            call_timeout: Duration::from_secs(2),
            queue_wait: Duration::from_secs(5),
            replication: hailmary_node::node::DEFAULT_REPLICATION,
            maintenance_interval: hailmary_node::node::DEFAULT_MAINTENANCE_INTERVAL,
            stats_interval: Duration::from_secs(30),
            diagnostic_address: Some("127.0.0.1:4999".to_string()),
        }
    }
}

impl FuzzConfig {
    /// Reads `HAILMARY_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let diagnostic_address = match lookup("HAILMARY_DIAGNOSTIC_ADDRESS") {
            Some(value) if value.is_empty() || value.eq_ignore_ascii_case("off") => None,
            Some(value) => Some(value),
            None => defaults.diagnostic_address,
        };

        let config = Self {
            node_count: parse_or(&lookup, "HAILMARY_NODE_COUNT", defaults.node_count)?,
            host: lookup("HAILMARY_HOST").unwrap_or(defaults.host),
            base_port: parse_or(&lookup, "HAILMARY_BASE_PORT", defaults.base_port)?,
            connections: parse_or(&lookup, "HAILMARY_CONNECTIONS", defaults.connections)?,
            queue_capacity: parse_or(&lookup, "HAILMARY_QUEUE_CAPACITY", defaults.queue_capacity)?,
            call_timeout: millis_or(&lookup, "HAILMARY_CALL_TIMEOUT_MS", defaults.call_timeout)?,
            queue_wait: millis_or(&lookup, "HAILMARY_QUEUE_WAIT_MS", defaults.queue_wait)?,
            replication: parse_or(&lookup, "HAILMARY_REPLICATION", defaults.replication)?,
            maintenance_interval: secs_or(
                &lookup,
                "HAILMARY_MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval,
            )?,
            stats_interval: secs_or(&lookup, "HAILMARY_STATS_INTERVAL_SECS", defaults.stats_interval)?,
            diagnostic_address,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_count < 2 {
            return Err(FuzzError::Config(format!(
                "node count must be at least 2, got {}",
                self.node_count
            )));
        }
        if self.queue_capacity == 0 {
            return Err(FuzzError::Config("queue capacity must be positive".to_string()));
        }
        if self.base_port != 0 && usize::from(self.base_port) + self.node_count > 65536 {
            return Err(FuzzError::Config(format!(
                "{} nodes starting at port {} run past the last port",
                self.node_count, self.base_port
            )));
        }
        Ok(())
    }

    /// Listen address of the `index`-th node. A base port of 0 gives every
    /// node an ephemeral port.
    pub fn node_address(&self, index: usize) -> String {
        let port = if self.base_port == 0 {
            0
        } else {
            usize::from(self.base_port) + index
        };
        format!("{}:{}", self.host, port)
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| FuzzError::Config(format!("{}={:?} is not valid", name, value))),
        None => Ok(default),
    }
}

fn millis_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Result<Duration> {
    let default = u64::try_from(default.as_millis())
        .map_err(|_| FuzzError::Config(format!("default for {} does not fit in milliseconds", name)))?;
    let millis = parse_or(lookup, name, default)?;
    Ok(Duration::from_millis(millis))
}

fn secs_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Result<Duration> {
    let secs = parse_or(lookup, name, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}
