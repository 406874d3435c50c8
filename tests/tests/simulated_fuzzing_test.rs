//! Fuzzing runs over the in-memory network

use hailmary_fuzzer::{
    Action, ActionEngine, ActionOutcome, EngineSettings, FatalKind, FuzzError,
};
use hailmary_integration_tests::integration::{SimNode, TestHarness};
use hailmary_lib::{Key, PeerRef};
use std::time::Duration;

fn quick_settings() -> EngineSettings {
    EngineSettings {
        call_timeout: Duration::from_millis(200),
        queue_wait: Duration::from_millis(20),
    }
}

async fn connect_all(node: &SimNode, others: &[SimNode]) -> Vec<PeerRef> {
    let mut peers = Vec::new();
    for other in others {
        peers.push(node.dht.connect(other.address()).await.unwrap());
    }
    peers
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_engines_run_until_cancelled() {
    let mut harness = TestHarness::new();
    harness.add_nodes(8, 8001).await;

    let result = harness
        .run_for(Duration::from_millis(300), 5, quick_settings())
        .await;
    assert!(result.is_ok(), "run failed: {:?}", result);

    let metrics = harness.stats().snapshot();
    assert_eq!(metrics.engines_bootstrapped, 8);
    assert!(metrics.total_actions() > 0);
    for node in harness.nodes() {
        assert!(!node.dht.known_peers().is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_fatal_error_stops_every_engine() {
    let mut harness = TestHarness::new();
    harness.add_nodes(4, 8501).await;

    let run = harness.spawn_engines(3, quick_settings());
    tokio::time::timeout(Duration::from_secs(5), harness.wait_for_bootstrap())
        .await
        .expect("engines never finished bootstrapping");

    // From here on only PROVIDE can fail fatally
    harness.network().set_drop_rate(1.0).await;

    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("engines kept running after a fatal error")
        .expect("engine task panicked");
    match result {
        Err(error @ FuzzError::Provide { .. }) => {
            assert_eq!(error.kind(), FatalKind::Invariant)
        }
        other => panic!("expected a fatal provide error, got {:?}", other),
    }
    assert!(harness.cancel_token().is_cancelled());
}

#[tokio::test]
async fn test_failed_peer_is_not_fatal() {
    let mut harness = TestHarness::new();
    let nodes = harness.add_nodes(3, 8101).await;
    connect_all(&nodes[0], &nodes[1..]).await;
    harness.fail_node(&nodes[2]).await;

    let key = Key::new("feedfacecafe");
    harness.queues().keys.push(key.clone()).await;
    let engine = ActionEngine::new(
        nodes[0].clone(),
        vec![nodes[2].peer.clone()],
        harness.context(quick_settings()),
    );

    let ping = engine.run_action(Action::Ping).await.unwrap();
    assert!(matches!(ping, ActionOutcome::PingFailed { .. }));

    // One peer answered "nothing", the other never answered
    let get = engine.run_action(Action::Get).await.unwrap();
    assert_eq!(get, ActionOutcome::SearchIncomplete { key: key.clone() });
    assert_eq!(harness.queues().keys.try_pop(), Some(key));
}

#[tokio::test]
async fn test_slow_network_times_out() {
    let mut harness = TestHarness::new();
    let nodes = harness.add_nodes(2, 8201).await;
    let peers = connect_all(&nodes[0], &nodes[1..]).await;
    harness.network().set_latency(300).await;

    let key = Key::new("0badc0ffee00");
    harness.queues().keys.push(key.clone()).await;
    let settings = EngineSettings {
        call_timeout: Duration::from_millis(50),
        queue_wait: Duration::from_millis(20),
    };
    let engine = ActionEngine::new(nodes[0].clone(), peers, harness.context(settings));

    let get = engine.run_action(Action::Get).await.unwrap();
    assert_eq!(get, ActionOutcome::TimedOut { key });

    let ping = engine.run_action(Action::Ping).await.unwrap();
    assert!(matches!(ping, ActionOutcome::PingFailed { .. }));
}

#[tokio::test]
async fn test_provide_under_total_message_loss_is_fatal() {
    let mut harness = TestHarness::new();
    let nodes = harness.add_nodes(2, 8301).await;
    let peers = connect_all(&nodes[0], &nodes[1..]).await;
    harness.network().set_drop_rate(1.0).await;

    let engine = ActionEngine::new(nodes[0].clone(), peers, harness.context(quick_settings()));
    let result = engine.run_action(Action::Provide).await;

    assert!(matches!(result, Err(FuzzError::Provide { .. })));
    assert!(harness.queues().providers.is_empty());
}

#[tokio::test]
async fn test_put_keys_never_reach_provider_queue() {
    let mut harness = TestHarness::with_capacity(16);
    let nodes = harness.add_nodes(3, 8401).await;
    let peers = connect_all(&nodes[1], &[nodes[0].clone(), nodes[2].clone()]).await;
    let engine = ActionEngine::new(nodes[1].clone(), peers, harness.context(quick_settings()));

    let outcomes = engine
        .run_script(&[Action::Put, Action::Put, Action::Put])
        .await
        .unwrap();
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ActionOutcome::Stored { enqueued: true, .. })));
    assert_eq!(harness.queues().keys.len(), 3);
    assert!(harness.queues().providers.is_empty());

    let outcome = engine.run_action(Action::FindProviders).await.unwrap();
    assert_eq!(outcome, ActionOutcome::QueueEmpty { queue: "providers" });
}
