//! DHT error types

use thiserror::Error;

/// Errors returned by a DHT collaborator.
#[derive(Error, Debug)]
pub enum DhtError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// Some peers could not be asked and no one who answered had the value.
    #[error("Search incomplete")]
    SearchIncomplete,

    #[error("Not found")]
    NotFound,

    #[error("Operation timeout")]
    Timeout,

    #[error("Provide failed: none of {attempted} peers accepted the record")]
    ProvideFailed { attempted: usize },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for DHT operations
pub type Result<T> = std::result::Result<T, DhtError>;
