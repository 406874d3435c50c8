use hailmary_lib::dht_messages::DhtMessage;
use hailmary_lib::{closest_peers, Key, PeerId, PeerRef};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{DhtError, Result};
use crate::network_client::NetworkClient;

macro_rules! log_info {
    ($address:expr, $($arg:tt)*) => ({
        info!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_warn {
    ($address:expr, $($arg:tt)*) => ({
        warn!("[{}] {}", $address, format_args!($($arg)*));
    })
}

macro_rules! log_error {
    ($address:expr, $($arg:tt)*) => ({
        error!("[{}] {}", $address, format_args!($($arg)*));
    })
}

pub const DEFAULT_REPLICATION: usize = 3;
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest request a node will read from one connection.
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;
const MAX_MISSED_PINGS: u32 = 3;
const MAINTENANCE_PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub peer: PeerRef,
    pub missed_pings: u32,
}

#[derive(Debug)]
pub struct DhtNode<T: NetworkClient> {
    pub info: PeerRef,
    pub peers: Arc<Mutex<HashMap<PeerId, PeerEntry>>>,
    pub data: Arc<Mutex<HashMap<Key, Vec<u8>>>>,
    pub providers: Arc<Mutex<HashMap<Key, Vec<PeerRef>>>>,
    pub network_client: Arc<T>,
    replication: usize,
    maintenance_interval: Duration,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl<T: NetworkClient> Clone for DhtNode<T> {
    fn clone(&self) -> Self {
        DhtNode {
            info: self.info.clone(),
            peers: self.peers.clone(),
            data: self.data.clone(), // This clones the Arc, not the HashMap
            providers: self.providers.clone(),
            network_client: self.network_client.clone(),
            replication: self.replication,
            maintenance_interval: self.maintenance_interval,
            request_timeout: self.request_timeout,
            shutdown: self.shutdown.clone(),
        }
    }
}

// A poisoned table only means another task panicked mid-update; the map itself
// is still usable.
fn lock<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: NetworkClient> DhtNode<T> {
    /// Creates a node that is not yet listening. Use [`DhtNode::bind`] to get
    /// a node that serves requests over TCP.
    pub fn new(id: PeerId, address: String, network_client: Arc<T>) -> Self {
        DhtNode {
            info: PeerRef { id, address },
            peers: Arc::new(Mutex::new(HashMap::new())),
            data: Arc::new(Mutex::new(HashMap::new())),
            providers: Arc::new(Mutex::new(HashMap::new())),
            network_client,
            replication: DEFAULT_REPLICATION,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_replication(mut self, replication: usize) -> Self {
        self.replication = replication.max(1);
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// How long an inbound connection may take to deliver its request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Binds `address`, gives the node a random identity and starts serving.
    ///
    /// Port 0 picks an ephemeral port; the node's address is the one actually
    /// bound.
    pub async fn bind(address: &str, network_client: Arc<T>) -> Result<Self> {
        Self::bind_with(address, network_client, |node| node).await
    }

    /// Like [`DhtNode::bind`], with a hook to tune the node before it starts.
    pub async fn bind_with(
        address: &str,
        network_client: Arc<T>,
        configure: impl FnOnce(Self) -> Self,
    ) -> Result<Self> {
        let socket_address: SocketAddr = address
            .parse()
            .map_err(|_| DhtError::InvalidAddress(address.to_string()))?;
        let listener = TcpListener::bind(socket_address)
            .await
            .map_err(|source| DhtError::Bind {
                address: address.to_string(),
                source,
            })?;
        let bound = listener.local_addr()?;

        let node = configure(Self::new(PeerId::random(), bound.to_string(), network_client));
        node.start(listener);
        Ok(node)
    }

    /// Spawns the accept loop and background maintenance.
    pub fn start(&self, listener: TcpListener) {
        log_info!(
            self.info.address,
            "DHT node {} starting at {}",
            self.info.id,
            self.info.address
        );

        let node = self.clone();
        tokio::spawn(async move {
            node.serve(listener).await;
        });

        let node = self.clone();
        tokio::spawn(async move {
            node.run_maintenance().await;
        });
    }

    /// Stops the listener and maintenance tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn serve(&self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    log_info!(self.info.address, "Listener stopped");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, _)) => {
                        let node = self.clone();
                        tokio::spawn(async move {
                            node.handle_connection(socket).await;
                        });
                    }
                    Err(e) => {
                        log_error!(self.info.address, "Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }

    async fn handle_connection(&self, mut socket: TcpStream) {
        let mut buffer = Vec::new();
        // The caller closes its write half once the request is sent
        let mut limited = (&mut socket).take(MAX_REQUEST_BYTES + 1);
        let read = limited.read_to_end(&mut buffer);
        match tokio::time::timeout(self.request_timeout, read).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                log_error!(self.info.address, "Failed to read from socket: {}", e);
                return;
            }
            Err(_) => {
                log_warn!(self.info.address, "Dropping connection with no request");
                return;
            }
        }
        if buffer.len() as u64 > MAX_REQUEST_BYTES {
            log_warn!(
                self.info.address,
                "Dropping request over {} bytes",
                MAX_REQUEST_BYTES
            );
            return;
        }

        let request = match bincode::deserialize::<DhtMessage>(&buffer) {
            Ok(message) => message,
            Err(e) => {
                log_error!(self.info.address, "Failed to deserialize message: {}", e);
                return;
            }
        };

        let response = self.handle_message(request).await;
        let encoded = match bincode::serialize(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                log_error!(self.info.address, "Failed to serialize response: {}", e);
                return;
            }
        };
        if let Err(e) = socket.write_all(&encoded).await {
            log_error!(
                self.info.address,
                "Failed to write response to socket: {}",
                e
            );
        }
    }

    /// Answers one request from another node.
    pub async fn handle_message(&self, message: DhtMessage) -> DhtMessage {
        debug!("[{}] Received message: {:?}", self.info.address, message);
        match message {
            DhtMessage::Hello { peer } => {
                self.add_peer(peer);
                DhtMessage::Welcome {
                    peer: self.info.clone(),
                }
            }
            DhtMessage::Ping => DhtMessage::Pong,
            DhtMessage::Store { key, value } => {
                self.store(key, value);
                DhtMessage::Stored
            }
            DhtMessage::Retrieve { key } => {
                let value = self.retrieve(&key);
                DhtMessage::Retrieved { key, value }
            }
            DhtMessage::AddProvider { key, provider } => {
                self.add_provider(key, provider);
                DhtMessage::ProviderAdded
            }
            DhtMessage::GetProviders { key } => {
                let providers = self.local_providers(&key);
                DhtMessage::Providers { key, providers }
            }
            other => {
                log_error!(
                    self.info.address,
                    "Unsupported message received: {:?}",
                    other
                );
                DhtMessage::Error {
                    message: "Unsupported message type".to_string(),
                }
            }
        }
    }

    // Stores a key-value pair locally
    pub fn store(&self, key: Key, value: Vec<u8>) {
        debug!("[{}] Stored key: {}", self.info.address, key);
        lock(&self.data).insert(key, value);
    }

    // Retrieves a locally stored value
    pub fn retrieve(&self, key: &Key) -> Option<Vec<u8>> {
        lock(&self.data).get(key).cloned()
    }

    pub fn add_provider(&self, key: Key, provider: PeerRef) {
        let mut providers = lock(&self.providers);
        let entry = providers.entry(key).or_default();
        if !entry.iter().any(|p| p.id == provider.id) {
            entry.push(provider);
        }
    }

    pub fn local_providers(&self, key: &Key) -> Vec<PeerRef> {
        lock(&self.providers).get(key).cloned().unwrap_or_default()
    }

    pub fn add_peer(&self, peer: PeerRef) {
        if peer.id == self.info.id {
            return;
        }
        let mut peers = lock(&self.peers);
        if !peers.contains_key(&peer.id) {
            debug!("[{}] New peer {}", self.info.address, peer);
        }
        peers.insert(
            peer.id,
            PeerEntry {
                peer,
                missed_pings: 0,
            },
        );
    }

    pub fn known_peers(&self) -> Vec<PeerRef> {
        lock(&self.peers).values().map(|e| e.peer.clone()).collect()
    }

    fn closest_known_peers(&self, key: &Key) -> Vec<PeerRef> {
        closest_peers(key, self.known_peers(), self.replication)
    }

    /// Records a failed liveness check; returns true once the peer is evicted.
    fn record_missed_ping(&self, id: &PeerId) -> bool {
        let mut peers = lock(&self.peers);
        let evict = match peers.get_mut(id) {
            Some(entry) => {
                entry.missed_pings += 1;
                entry.missed_pings >= MAX_MISSED_PINGS
            }
            None => false,
        };
        if evict {
            peers.remove(id);
        }
        evict
    }

    fn record_alive(&self, id: &PeerId) {
        if let Some(entry) = lock(&self.peers).get_mut(id) {
            entry.missed_pings = 0;
        }
    }

    /// Opens a link to the node at `address`; both sides learn each other.
    pub async fn connect(&self, address: &str) -> Result<PeerRef> {
        let hello = DhtMessage::Hello {
            peer: self.info.clone(),
        };
        match self.network_client.call_node(address, hello).await {
            Ok(DhtMessage::Welcome { peer }) => {
                self.add_peer(peer.clone());
                Ok(peer)
            }
            Ok(other) => Err(DhtError::Connect {
                address: address.to_string(),
                reason: format!("unexpected handshake response: {:?}", other),
            }),
            Err(e) => Err(DhtError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub async fn ping(&self, peer: &PeerRef, timeout: Duration) -> Result<()> {
        let call = self.network_client.call_node(&peer.address, DhtMessage::Ping);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(DhtMessage::Pong)) => {
                self.record_alive(&peer.id);
                Ok(())
            }
            Ok(Ok(other)) => Err(DhtError::UnexpectedResponse(format!("{:?}", other))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DhtError::Timeout),
        }
    }

    /// Stores locally and replicates to the closest known peers. Replica
    /// failures are logged, not returned.
    pub async fn put_value(&self, key: &Key, value: Vec<u8>) -> Result<()> {
        self.store(key.clone(), value.clone());

        let targets = self.closest_known_peers(key);
        let attempted = targets.len();
        let message = DhtMessage::Store {
            key: key.clone(),
            value,
        };
        let failures = self.broadcast(targets, message, |r| matches!(r, DhtMessage::Stored)).await;
        if failures > 0 {
            log_warn!(
                self.info.address,
                "Replicated {} to {}/{} peers",
                key,
                attempted - failures,
                attempted
            );
        }
        Ok(())
    }

    pub async fn get_value(&self, key: &Key, timeout: Duration) -> Result<Vec<u8>> {
        if let Some(value) = self.retrieve(key) {
            return Ok(value);
        }

        let peers = self.known_peers();
        if peers.is_empty() {
            return Err(DhtError::NotFound);
        }

        let mut lookups = JoinSet::new();
        for peer in peers {
            let client = self.network_client.clone();
            let key = key.clone();
            lookups.spawn(async move {
                client
                    .call_node(&peer.address, DhtMessage::Retrieve { key })
                    .await
            });
        }

        let address = &self.info.address;
        let search = async {
            let mut failures = 0usize;
            while let Some(joined) = lookups.join_next().await {
                match joined {
                    Ok(Ok(DhtMessage::Retrieved {
                        value: Some(value), ..
                    })) => return Ok(value),
                    Ok(Ok(DhtMessage::Retrieved { value: None, .. })) => {}
                    Ok(Ok(other)) => {
                        debug!("[{}] Unexpected response to Retrieve: {:?}", address, other);
                        failures += 1;
                    }
                    Ok(Err(e)) => {
                        debug!("[{}] Retrieve failed: {}", address, e);
                        failures += 1;
                    }
                    Err(e) => {
                        debug!("[{}] Retrieve task failed: {}", address, e);
                        failures += 1;
                    }
                }
            }
            if failures > 0 {
                Err(DhtError::SearchIncomplete)
            } else {
                Err(DhtError::NotFound)
            }
        };

        // Dropping the JoinSet on timeout aborts outstanding lookups
        match tokio::time::timeout(timeout, search).await {
            Ok(result) => result,
            Err(_) => Err(DhtError::Timeout),
        }
    }

    /// Announces this node as a provider of `key`.
    pub async fn provide(&self, key: &Key) -> Result<()> {
        self.add_provider(key.clone(), self.info.clone());

        let targets = self.closest_known_peers(key);
        let attempted = targets.len();
        if attempted == 0 {
            return Ok(());
        }
        let message = DhtMessage::AddProvider {
            key: key.clone(),
            provider: self.info.clone(),
        };
        let failures = self
            .broadcast(targets, message, |r| matches!(r, DhtMessage::ProviderAdded))
            .await;
        if failures == attempted {
            return Err(DhtError::ProvideFailed { attempted });
        }
        Ok(())
    }

    /// Providers known locally plus whatever peers report before `timeout`.
    pub async fn find_providers(&self, key: &Key, timeout: Duration) -> Result<Vec<PeerRef>> {
        let mut found = self.local_providers(key);

        let mut lookups = JoinSet::new();
        for peer in self.known_peers() {
            let client = self.network_client.clone();
            let key = key.clone();
            lookups.spawn(async move {
                client
                    .call_node(&peer.address, DhtMessage::GetProviders { key })
                    .await
            });
        }

        let address = &self.info.address;
        let collect = async {
            while let Some(joined) = lookups.join_next().await {
                match joined {
                    Ok(Ok(DhtMessage::Providers { providers, .. })) => {
                        for provider in providers {
                            if !found.iter().any(|p| p.id == provider.id) {
                                found.push(provider);
                            }
                        }
                    }
                    Ok(Ok(other)) => {
                        debug!("[{}] Unexpected response to GetProviders: {:?}", address, other);
                    }
                    Ok(Err(e)) => debug!("[{}] GetProviders failed: {}", address, e),
                    Err(e) => debug!("[{}] GetProviders task failed: {}", address, e),
                }
            }
        };
        if tokio::time::timeout(timeout, collect).await.is_err() {
            debug!(
                "[{}] Provider search for {} cut short by timeout",
                self.info.address, key
            );
        }

        if found.is_empty() {
            Err(DhtError::NotFound)
        } else {
            Ok(found)
        }
    }

    /// Sends `message` to every target; returns how many did not acknowledge.
    async fn broadcast(
        &self,
        targets: Vec<PeerRef>,
        message: DhtMessage,
        acknowledged: fn(&DhtMessage) -> bool,
    ) -> usize {
        let mut calls = JoinSet::new();
        for peer in targets {
            let client = self.network_client.clone();
            let message = message.clone();
            calls.spawn(async move { client.call_node(&peer.address, message).await });
        }

        let mut failures = 0;
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok(Ok(response)) if acknowledged(&response) => {}
                Ok(Ok(other)) => {
                    debug!("[{}] Unexpected acknowledgement: {:?}", self.info.address, other);
                    failures += 1;
                }
                Ok(Err(e)) => {
                    debug!("[{}] Replication call failed: {}", self.info.address, e);
                    failures += 1;
                }
                Err(_) => failures += 1,
            }
        }
        failures
    }

    /// Pings every known peer once, evicting peers that keep missing.
    pub async fn check_peers(&self) {
        for peer in self.known_peers() {
            if let Err(e) = self.ping(&peer, MAINTENANCE_PING_TIMEOUT).await {
                if self.record_missed_ping(&peer.id) {
                    log_warn!(self.info.address, "Evicted unresponsive peer {}: {}", peer, e);
                }
            }
        }
    }

    async fn run_maintenance(&self) {
        let mut interval = tokio::time::interval(self.maintenance_interval);
        interval.tick().await; // First tick completes immediately
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => self.check_peers().await,
            }
        }
    }
}
