// Shared types for hailmary nodes and the fuzzer
pub mod dht_messages;
pub mod metrics;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

pub const ID_LEN: usize = 16;

/// Random identity of a node in the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; ID_LEN]);

impl PeerId {
    /// Draws a fresh id from the operating system's CSPRNG.
    pub fn random() -> Self {
        let mut id = [0u8; ID_LEN];
        OsRng.fill_bytes(&mut id);
        PeerId(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Address and identity of another node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRef {
    pub id: PeerId,
    pub address: String,
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Opaque content identifier circulated between actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Key(key.into())
    }

    pub fn random() -> Self {
        Key(random_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Position of the key in the peer id space (truncated SHA-1).
    pub fn digest(&self) -> [u8; ID_LEN] {
        let hash: [u8; 20] = Sha1::digest(self.0.as_bytes()).into();
        let mut digest = [0u8; ID_LEN];
        for (dst, src) in digest.iter_mut().zip(hash.iter()) {
            *dst = *src;
        }
        digest
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Six random bytes, hex encoded.
pub fn random_token() -> String {
    let mut buf = [0u8; 6];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// XOR distance between a point in the id space and a peer.
/// Distances compare lexicographically, smaller is closer.
pub fn xor_distance(point: &[u8; ID_LEN], peer: &PeerId) -> [u8; ID_LEN] {
    let mut distance = [0u8; ID_LEN];
    for ((d, a), b) in distance.iter_mut().zip(point.iter()).zip(peer.0.iter()) {
        *d = a ^ b;
    }
    distance
}

/// Orders `peers` by closeness to `key` and keeps the first `count`.
pub fn closest_peers(key: &Key, mut peers: Vec<PeerRef>, count: usize) -> Vec<PeerRef> {
    let point = key.digest();
    peers.sort_by_key(|peer| xor_distance(&point, &peer.id));
    peers.truncate(count);
    peers
}
