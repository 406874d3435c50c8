//! End-to-end scenarios over real loopback TCP

use hailmary_fuzzer::{
    provision_node, Action, ActionEngine, ActionOutcome, ActionStats, EngineContext,
    EngineSettings, FuzzConfig, LiveNode, WorkQueues,
};
use hailmary_lib::PeerRef;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn provision_three() -> Vec<LiveNode> {
    let config = FuzzConfig::default();
    let mut nodes = Vec::new();
    for _ in 0..3 {
        nodes.push(
            provision_node("127.0.0.1:0", &config)
                .await
                .expect("Failed to provision node"),
        );
    }
    nodes
}

/// Connects `nodes[index]` to every other node, in order
async fn fixed_pool(nodes: &[LiveNode], index: usize) -> Vec<PeerRef> {
    let mut peers = Vec::new();
    for (i, other) in nodes.iter().enumerate() {
        if i == index {
            continue;
        }
        let peer = nodes[index]
            .dht
            .connect(other.address())
            .await
            .expect("Failed to connect");
        assert_eq!(peer, other.peer);
        peers.push(peer);
    }
    peers
}

fn context() -> EngineContext {
    EngineContext::new(
        WorkQueues::default(),
        Arc::new(ActionStats::new()),
        EngineSettings::default(),
        CancellationToken::new(),
    )
}

fn shutdown(nodes: &[LiveNode]) {
    for node in nodes {
        node.dht.shutdown();
    }
}

#[tokio::test]
async fn test_put_then_get_on_same_node() {
    let nodes = provision_three().await;
    let mut pools = Vec::new();
    for index in 0..nodes.len() {
        pools.push(fixed_pool(&nodes, index).await);
    }
    assert!(pools.iter().all(|pool| pool.len() == 2));

    let ctx = context();
    let engine = ActionEngine::new(nodes[0].clone(), pools[0].clone(), ctx.clone());
    let outcomes = engine
        .run_script(&[Action::Put, Action::Get])
        .await
        .expect("Script should not fail");

    match outcomes.as_slice() {
        [ActionOutcome::Stored {
            key: put_key,
            value: put_value,
            enqueued: true,
        }, ActionOutcome::Found {
            key: got_key,
            value: got_value,
        }] => {
            assert_eq!(got_key, put_key);
            assert_eq!(got_value, put_value);
        }
        other => panic!("unexpected outcomes {:?}", other),
    }

    // The key went back for the next GET
    assert_eq!(ctx.queues.keys.len(), 1);
    shutdown(&nodes);
}

#[tokio::test]
async fn test_keys_cross_between_engines() {
    let nodes = provision_three().await;
    let pools = vec![
        fixed_pool(&nodes, 0).await,
        fixed_pool(&nodes, 1).await,
        fixed_pool(&nodes, 2).await,
    ];
    let ctx = context();
    let engines: Vec<_> = nodes
        .iter()
        .zip(pools)
        .map(|(node, pool)| ActionEngine::new(node.clone(), pool, ctx.clone()))
        .collect();

    // A value stored through node 0 is replicated to its peers
    let put = engines[0].run_action(Action::Put).await.unwrap();
    let ActionOutcome::Stored { key, value, .. } = put.clone() else {
        panic!("unexpected outcome {:?}", put);
    };
    let get = engines[1].run_action(Action::Get).await.unwrap();
    assert_eq!(get, ActionOutcome::Found { key, value });

    // A provider announced by node 2 is found from node 0
    let provide = engines[2].run_action(Action::Provide).await.unwrap();
    assert!(matches!(provide, ActionOutcome::Provided { enqueued: true, .. }));
    match engines[0].run_action(Action::FindProviders).await.unwrap() {
        ActionOutcome::ProvidersFound { providers, .. } => {
            assert!(providers.contains(&nodes[2].peer));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let metrics = ctx.stats.snapshot();
    assert_eq!(metrics.puts, 1);
    assert_eq!(metrics.gets_found, 1);
    assert_eq!(metrics.provides, 1);
    assert_eq!(metrics.find_providers_found, 1);
    shutdown(&nodes);
}

#[tokio::test]
async fn test_ping_through_bootstrap_pool() {
    let nodes = provision_three().await;
    let pool = fixed_pool(&nodes, 1).await;
    let engine = ActionEngine::new(nodes[1].clone(), pool, context());

    for _ in 0..4 {
        let outcome = engine.run_action(Action::Ping).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Pinged { .. }));
    }
    shutdown(&nodes);
}
