//! Hailmary DHT Node Library
//!
//! A small one-hop DHT node: peers exchange values and provider records over
//! bincode-encoded TCP requests. The fuzzer drives nodes exclusively through
//! the [`Dht`] capability trait.

pub mod dht;
pub mod error;
pub mod network_client;
pub mod node;

// Re-export main types for public API
pub use dht::Dht;
pub use error::DhtError;
pub use network_client::{NetworkClient, RealNetworkClient};
pub use node::DhtNode;

// Re-export from lib crate for convenience
pub use hailmary_lib::dht_messages::DhtMessage;
pub use hailmary_lib::{Key, PeerId, PeerRef};

use std::sync::Arc;
use std::time::Duration;

/// Configuration for a DhtNode
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    /// Number of peers a value or provider record is pushed to.
    pub replication: usize,
    pub maintenance_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5000".to_string(),
            replication: node::DEFAULT_REPLICATION,
            maintenance_interval: node::DEFAULT_MAINTENANCE_INTERVAL,
        }
    }
}

impl DhtNode<RealNetworkClient> {
    /// Bind and start a DhtNode from config with the real network client
    pub async fn from_config(config: Config) -> Result<Self, DhtError> {
        let Config {
            address,
            replication,
            maintenance_interval,
        } = config;
        DhtNode::bind_with(&address, Arc::new(RealNetworkClient::new()), move |node| {
            node.with_replication(replication)
                .with_maintenance_interval(maintenance_interval)
        })
        .await
    }
}
