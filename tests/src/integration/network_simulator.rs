use async_trait::async_trait;
use hailmary_lib::dht_messages::DhtMessage;
use hailmary_node::error::{DhtError, Result};
use hailmary_node::NetworkClient;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Routes DHT messages between in-process nodes without TCP connections
#[derive(Clone)]
pub struct NetworkSimulator {
    /// Maps node addresses to message channels
    nodes: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<SimulatorMessage>>>>,
    /// Controls message delivery timing and failures
    delivery_controller: Arc<RwLock<DeliveryController>>,
}

/// Request delivered to a simulated node
#[derive(Debug)]
pub enum SimulatorMessage {
    Request {
        from: String,
        message: DhtMessage,
        response_sender: oneshot::Sender<DhtMessage>,
    },
}

#[derive(Default)]
struct DeliveryController {
    /// Addresses that should fail message delivery
    failed_nodes: HashSet<String>,
    /// Simulated network latency in milliseconds
    latency_ms: u64,
    /// Drop rate for messages (0.0 to 1.0)
    drop_rate: f64,
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkSimulator {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            delivery_controller: Arc::new(RwLock::new(DeliveryController::default())),
        }
    }

    /// Register a node with the simulator
    pub async fn register_node(
        &self,
        address: String,
        sender: mpsc::UnboundedSender<SimulatorMessage>,
    ) {
        self.nodes.write().await.insert(address, sender);
    }

    /// Mark a node as failed (messages will not be delivered)
    pub async fn mark_node_failed(&self, address: &str) {
        self.delivery_controller
            .write()
            .await
            .failed_nodes
            .insert(address.to_string());
    }

    pub async fn mark_node_recovered(&self, address: &str) {
        self.delivery_controller
            .write()
            .await
            .failed_nodes
            .remove(address);
    }

    pub async fn set_latency(&self, latency_ms: u64) {
        self.delivery_controller.write().await.latency_ms = latency_ms;
    }

    /// Set message drop rate (0.0 = no drops, 1.0 = drop all)
    pub async fn set_drop_rate(&self, drop_rate: f64) {
        self.delivery_controller.write().await.drop_rate = drop_rate.clamp(0.0, 1.0);
    }

    pub async fn is_node_registered(&self, address: &str) -> bool {
        self.nodes.read().await.contains_key(address)
    }

    /// Create a NetworkClient for a specific node
    pub fn create_client(&self, from_address: String) -> SimulatedNetworkClient {
        SimulatedNetworkClient {
            simulator: self.clone(),
            from_address,
        }
    }
}

/// NetworkClient implementation that uses the simulator for message delivery
#[derive(Clone)]
pub struct SimulatedNetworkClient {
    simulator: NetworkSimulator,
    from_address: String,
}

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
impl NetworkClient for SimulatedNetworkClient {
    async fn call_node(&self, address: &str, message: DhtMessage) -> Result<DhtMessage> {
        let (failed, latency_ms, drop_rate) = {
            let controller = self.simulator.delivery_controller.read().await;
            (
                controller.failed_nodes.contains(address),
                controller.latency_ms,
                controller.drop_rate,
            )
        };

        if failed {
            return Err(DhtError::Network(format!("Node {} is marked as failed", address)));
        }
        if drop_rate > 0.0 && rand::random::<f64>() < drop_rate {
            return Err(DhtError::Network("Message dropped by simulator".to_string()));
        }
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }

        let sender = self
            .simulator
            .nodes
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| DhtError::Network(format!("Node {} not registered", address)))?;

        let (response_tx, response_rx) = oneshot::channel();
        sender
            .send(SimulatorMessage::Request {
                from: self.from_address.clone(),
                message,
                response_sender: response_tx,
            })
            .map_err(|_| DhtError::Network("Failed to send message to node".to_string()))?;

        match tokio::time::timeout(RESPONSE_TIMEOUT, response_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(DhtError::Network("Response channel closed".to_string())),
            Err(_) => Err(DhtError::Network("Request timeout".to_string())),
        }
    }
}
