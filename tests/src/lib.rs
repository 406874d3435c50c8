//! Integration tests for the hailmary fuzzer
//!
//! The framework in [`integration`] runs production nodes and engines over a
//! simulated network; the tests below check the simulator itself.

pub mod integration;

#[cfg(test)]
mod tests {
    use crate::integration::TestHarness;
    use hailmary_lib::dht_messages::DhtMessage;
    use hailmary_lib::Key;
    use hailmary_node::{DhtError, NetworkClient};

    #[tokio::test]
    async fn test_network_simulation_routes_requests() {
        let mut harness = TestHarness::new();
        let nodes = harness.add_nodes(2, 8001).await;

        let client = harness.network().create_client("127.0.0.1:8000".to_string());
        let response = client
            .call_node(nodes[1].address(), DhtMessage::Ping)
            .await
            .unwrap();
        assert!(matches!(response, DhtMessage::Pong));

        client
            .call_node(
                nodes[0].address(),
                DhtMessage::Store {
                    key: Key::new("0123456789ab"),
                    value: b"value".to_vec(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            nodes[0].dht.retrieve(&Key::new("0123456789ab")),
            Some(b"value".to_vec())
        );
    }

    #[tokio::test]
    async fn test_failed_and_unknown_nodes() {
        let mut harness = TestHarness::new();
        let node = harness.add_node(8001).await;
        let client = harness.network().create_client("127.0.0.1:8000".to_string());

        harness.fail_node(&node).await;
        let result = client.call_node(node.address(), DhtMessage::Ping).await;
        assert!(matches!(result, Err(DhtError::Network(_))));

        harness.recover_node(&node).await;
        assert!(client.call_node(node.address(), DhtMessage::Ping).await.is_ok());

        let result = client.call_node("127.0.0.1:9999", DhtMessage::Ping).await;
        assert!(matches!(result, Err(DhtError::Network(_))));
        assert!(!harness.network().is_node_registered("127.0.0.1:9999").await);
    }
}
