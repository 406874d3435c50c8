use hailmary_lib::PeerRef;
use hailmary_node::{Config, Dht, DhtNode, RealNetworkClient};
use std::sync::Arc;

use crate::config::FuzzConfig;
use crate::error::{FuzzError, Result};

/// A provisioned participant: the DHT it runs and how others reach it.
#[derive(Debug)]
pub struct Node<D: Dht> {
    pub dht: Arc<D>,
    pub peer: PeerRef,
}

impl<D: Dht> Clone for Node<D> {
    fn clone(&self) -> Self {
        Node {
            dht: self.dht.clone(),
            peer: self.peer.clone(),
        }
    }
}

impl<D: Dht> Node<D> {
    pub fn new(dht: Arc<D>) -> Self {
        let peer = dht.peer();
        Node { dht, peer }
    }

    pub fn address(&self) -> &str {
        &self.peer.address
    }
}

/// A node backed by a real TCP listener.
pub type LiveNode = Node<DhtNode<RealNetworkClient>>;

/// Binds a node to `address` and starts it listening.
pub async fn provision_node(address: &str, config: &FuzzConfig) -> Result<LiveNode> {
    let node_config = Config {
        address: address.to_string(),
        replication: config.replication,
        maintenance_interval: config.maintenance_interval,
    };
    let dht = DhtNode::from_config(node_config)
        .await
        .map_err(|source| FuzzError::Provision {
            address: address.to_string(),
            source,
        })?;
    Ok(Node::new(Arc::new(dht)))
}

pub async fn provision_all(config: &FuzzConfig) -> Result<Vec<LiveNode>> {
    let mut nodes = Vec::with_capacity(config.node_count);
    for index in 0..config.node_count {
        let node = provision_node(&config.node_address(index), config).await?;
        nodes.push(node);
    }
    Ok(nodes)
}
