use crate::integration::{NetworkSimulator, SimulatedNetworkClient, SimulatorMessage};
use hailmary_fuzzer::{
    run_engines, ActionStats, EngineContext, EngineSettings, FuzzError, Node, WorkQueues,
};
use hailmary_lib::PeerId;
use hailmary_node::DhtNode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A production node wired to the simulated network
pub type SimNode = Node<DhtNode<SimulatedNetworkClient>>;

/// Orchestrates simulated fuzzing runs
pub struct TestHarness {
    /// Simulated network for message routing
    network: NetworkSimulator,
    nodes: Vec<SimNode>,
    /// Message processing tasks, one per node
    tasks: Vec<JoinHandle<()>>,
    queues: WorkQueues,
    stats: Arc<ActionStats>,
    cancel: CancellationToken,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_capacity(hailmary_fuzzer::queue::DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            network: NetworkSimulator::new(),
            nodes: Vec::new(),
            tasks: Vec::new(),
            queues: WorkQueues::new(queue_capacity),
            stats: Arc::new(ActionStats::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Adds a node answering requests at `127.0.0.1:port`
    pub async fn add_node(&mut self, port: u16) -> SimNode {
        let address = format!("127.0.0.1:{}", port);

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.network.register_node(address.clone(), tx).await;

        let client = self.network.create_client(address.clone());
        let dht = DhtNode::new(PeerId::random(), address, Arc::new(client));

        let responder = dht.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(SimulatorMessage::Request {
                from: _,
                message,
                response_sender,
            }) = rx.recv().await
            {
                let response = responder.handle_message(message).await;
                let _ = response_sender.send(response);
            }
        }));

        let node = Node::new(Arc::new(dht));
        self.nodes.push(node.clone());
        node
    }

    pub async fn add_nodes(&mut self, count: u16, base_port: u16) -> Vec<SimNode> {
        let mut added = Vec::new();
        for i in 0..count {
            added.push(self.add_node(base_port + i).await);
        }
        added
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn network(&self) -> &NetworkSimulator {
        &self.network
    }

    pub fn queues(&self) -> &WorkQueues {
        &self.queues
    }

    pub fn stats(&self) -> &Arc<ActionStats> {
        &self.stats
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Engine context sharing this harness's queues, stats and cancellation
    pub fn context(&self, settings: EngineSettings) -> EngineContext {
        EngineContext::new(
            self.queues.clone(),
            self.stats.clone(),
            settings,
            self.cancel.clone(),
        )
    }

    pub async fn fail_node(&self, node: &SimNode) {
        self.network.mark_node_failed(node.address()).await;
    }

    pub async fn recover_node(&self, node: &SimNode) {
        self.network.mark_node_recovered(node.address()).await;
    }

    /// Starts one engine per node in the background, exactly like the binary
    /// does. The task ends once every engine has stopped.
    pub fn spawn_engines(
        &self,
        connections: usize,
        settings: EngineSettings,
    ) -> JoinHandle<Result<(), FuzzError>> {
        let nodes = Arc::new(self.nodes.clone());
        tokio::spawn(run_engines(nodes, connections, self.context(settings)))
    }

    /// Lets engines run for `duration`, then cancels them and waits for all of
    /// them to stop
    pub async fn run_for(
        &self,
        duration: Duration,
        connections: usize,
        settings: EngineSettings,
    ) -> Result<(), FuzzError> {
        let run = self.spawn_engines(connections, settings);
        tokio::time::sleep(duration).await;
        self.cancel.cancel();
        run.await
            .unwrap_or_else(|e| Err(FuzzError::Task(e.to_string())))
    }

    /// Polls until every node's engine has finished bootstrapping
    pub async fn wait_for_bootstrap(&self) {
        let expected = self.nodes.len() as u64;
        while self.stats.snapshot().engines_bootstrapped < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}
