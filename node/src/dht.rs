use async_trait::async_trait;
use hailmary_lib::{Key, PeerRef};
use std::time::Duration;

use crate::error::Result;
use crate::network_client::NetworkClient;
use crate::node::DhtNode;

/// Capabilities the fuzzer exercises on a node.
///
/// Listening and background maintenance start when the node is constructed,
/// so there is no separate start operation here.
#[async_trait]
pub trait Dht: Send + Sync + 'static {
    /// This node's own identity and address.
    fn peer(&self) -> PeerRef;

    async fn connect(&self, address: &str) -> Result<PeerRef>;

    async fn ping(&self, peer: &PeerRef, timeout: Duration) -> Result<()>;

    async fn put_value(&self, key: &Key, value: Vec<u8>) -> Result<()>;

    /// Fails with `SearchIncomplete`, `NotFound` or `Timeout` when the value
    /// could not be located; anything else is unexpected.
    async fn get_value(&self, key: &Key, timeout: Duration) -> Result<Vec<u8>>;

    async fn provide(&self, key: &Key) -> Result<()>;

    /// Fails with `NotFound` when nobody provides the key.
    async fn find_providers(&self, key: &Key, timeout: Duration) -> Result<Vec<PeerRef>>;
}

#[async_trait]
impl<T: NetworkClient> Dht for DhtNode<T> {
    fn peer(&self) -> PeerRef {
        self.info.clone()
    }

    async fn connect(&self, address: &str) -> Result<PeerRef> {
        DhtNode::connect(self, address).await
    }

    async fn ping(&self, peer: &PeerRef, timeout: Duration) -> Result<()> {
        DhtNode::ping(self, peer, timeout).await
    }

    async fn put_value(&self, key: &Key, value: Vec<u8>) -> Result<()> {
        DhtNode::put_value(self, key, value).await
    }

    async fn get_value(&self, key: &Key, timeout: Duration) -> Result<Vec<u8>> {
        DhtNode::get_value(self, key, timeout).await
    }

    async fn provide(&self, key: &Key) -> Result<()> {
        DhtNode::provide(self, key).await
    }

    async fn find_providers(&self, key: &Key, timeout: Duration) -> Result<Vec<PeerRef>> {
        DhtNode::find_providers(self, key, timeout).await
    }
}
