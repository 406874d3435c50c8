use hailmary_lib::PeerRef;
use hailmary_node::Dht;
use rand::Rng;

use crate::error::{FuzzError, Result};
use crate::provision::Node;

pub const DEFAULT_CONNECTIONS: usize = 5;

/// Chooses `count` peers for `target` uniformly from `0..node_count`.
///
/// Drawing `target` itself is retried without counting. The same peer may be
/// drawn more than once.
pub fn pick_peers<R: Rng + ?Sized>(
    node_count: usize,
    target: usize,
    count: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if target >= node_count {
        return Err(FuzzError::UnknownNode(target));
    }
    if node_count < 2 {
        return Err(FuzzError::TooFewNodes(node_count));
    }

    let mut picks = Vec::with_capacity(count);
    while picks.len() < count {
        let candidate = rng.gen_range(0..node_count);
        if candidate == target {
            continue;
        }
        picks.push(candidate);
    }
    Ok(picks)
}

/// Connects `nodes[target]` to `count` random other nodes and returns the
/// peers it reached. Any failed connect aborts the bootstrap.
pub async fn bootstrap_peers<D: Dht, R: Rng + ?Sized>(
    nodes: &[Node<D>],
    target: usize,
    count: usize,
    rng: &mut R,
) -> Result<Vec<PeerRef>> {
    let picks = pick_peers(nodes.len(), target, count, rng)?;
    let node = nodes.get(target).ok_or(FuzzError::UnknownNode(target))?;

    let mut peers = Vec::with_capacity(picks.len());
    for pick in picks {
        let other = nodes.get(pick).ok_or(FuzzError::UnknownNode(pick))?;
        log_info!(node.address(), "Connecting to {}", other.peer);
        let peer = node
            .dht
            .connect(other.address())
            .await
            .map_err(|source| FuzzError::Bootstrap {
                from: node.address().to_string(),
                to: other.address().to_string(),
                source,
            })?;
        peers.push(peer);
    }

    log_info!(node.address(), "DHT done with connects.");
    Ok(peers)
}
