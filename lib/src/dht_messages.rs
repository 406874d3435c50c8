use serde::{Deserialize, Serialize};

use crate::{Key, PeerRef};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DhtMessage {
    // Introduce ourselves so the remote adds us to its peer table
    Hello {
        peer: PeerRef,
    },
    // Response to Hello carrying the remote's identity
    Welcome {
        peer: PeerRef,
    },
    // Liveness probe
    Ping,
    Pong,
    // Store a key-value pair
    Store {
        key: Key,
        value: Vec<u8>,
    },
    Stored,
    // Retrieve a value by key
    Retrieve {
        key: Key,
    },
    // Response with a retrieved value
    Retrieved {
        key: Key,
        value: Option<Vec<u8>>,
    },
    // Record `provider` as a provider of `key`
    AddProvider {
        key: Key,
        provider: PeerRef,
    },
    ProviderAdded,
    // Request the providers known for a key
    GetProviders {
        key: Key,
    },
    // Response with known providers
    Providers {
        key: Key,
        providers: Vec<PeerRef>,
    },
    Error {
        message: String,
    },
}
