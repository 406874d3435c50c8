//! Fatal harness errors.
//!
//! Anything that can go wrong mid-run without stopping the fuzzer is an
//! [`ActionOutcome`](crate::engine::ActionOutcome), not an error.

use hailmary_lib::Key;
use hailmary_node::DhtError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FuzzError {
    #[error("Failed to provision node at {address}: {source}")]
    Provision {
        address: String,
        #[source]
        source: DhtError,
    },

    #[error("Need at least two nodes to build a topology, have {0}")]
    TooFewNodes(usize),

    #[error("No node at index {0}")]
    UnknownNode(usize),

    #[error("[{from}] Failed to connect to {to}: {source}")]
    Bootstrap {
        from: String,
        to: String,
        #[source]
        source: DhtError,
    },

    #[error("[{node}] Provide of {key} failed: {source}")]
    Provide {
        node: String,
        key: Key,
        #[source]
        source: DhtError,
    },

    #[error("[{node}] Unexpected error getting {key}: {source}")]
    UnexpectedGet {
        node: String,
        key: Key,
        #[source]
        source: DhtError,
    },

    #[error("[{node}] Unexpected error finding providers of {key}: {source}")]
    UnexpectedFindProviders {
        node: String,
        key: Key,
        #[source]
        source: DhtError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Diagnostics listener failed: {0}")]
    Diagnostics(#[source] std::io::Error),

    #[error("Engine task failed: {0}")]
    Task(String),
}

/// Broad class of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The environment cannot support a run (bad config, ports, topology).
    Setup,
    /// A collaborator did something the harness does not model.
    Invariant,
}

impl FuzzError {
    pub fn kind(&self) -> FatalKind {
        match self {
            FuzzError::Provision { .. }
            | FuzzError::TooFewNodes(_)
            | FuzzError::UnknownNode(_)
            | FuzzError::Bootstrap { .. }
            | FuzzError::Config(_)
            | FuzzError::Diagnostics(_) => FatalKind::Setup,
            FuzzError::Provide { .. }
            | FuzzError::UnexpectedGet { .. }
            | FuzzError::UnexpectedFindProviders { .. }
            | FuzzError::Task(_) => FatalKind::Invariant,
        }
    }
}

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, FuzzError>;
