//! The per-node action loop.
//!
//! Every engine drives exactly one node. After connecting the node to a few
//! random peers it keeps drawing one of five actions at random. PUT and
//! PROVIDE mint fresh keys and hand them to the shared queues; GET and
//! FIND-PROVIDE check a key out, look it up and put it back.

use hailmary_lib::{random_token, Key, PeerRef};
use hailmary_node::{Dht, DhtError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{FuzzError, Result};
use crate::provision::Node;
use crate::queue::{WaitError, WorkQueue, WorkQueues};
use crate::stats::ActionStats;
use crate::topology::bootstrap_peers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Ping,
    Put,
    Get,
    Provide,
    FindProviders,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Ping,
        Action::Put,
        Action::Get,
        Action::Provide,
        Action::FindProviders,
    ];

    /// Draws one of the five actions with equal probability.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        match rng.gen_range(0..5) {
            0 => Action::Ping,
            1 => Action::Put,
            2 => Action::Get,
            3 => Action::Provide,
            _ => Action::FindProviders,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Ping => "ping",
            Action::Put => "put",
            Action::Get => "get",
            Action::Provide => "provide",
            Action::FindProviders => "find providers",
        };
        f.write_str(name)
    }
}

/// What a single action observed. None of these stop the run.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Pinged {
        peer: PeerRef,
    },
    PingFailed {
        peer: PeerRef,
        reason: String,
    },
    /// The node has no bootstrap peers to ping.
    NoPeers,
    /// `enqueued` is false when every slot of the key queue stayed checked
    /// out for the whole queue wait and the fresh key was not handed on.
    Stored {
        key: Key,
        value: Vec<u8>,
        enqueued: bool,
    },
    PutFailed {
        key: Key,
        reason: String,
        enqueued: bool,
    },
    Found {
        key: Key,
        value: Vec<u8>,
    },
    SearchIncomplete {
        key: Key,
    },
    NotFound {
        key: Key,
    },
    TimedOut {
        key: Key,
    },
    Provided {
        key: Key,
        enqueued: bool,
    },
    ProvidersFound {
        key: Key,
        providers: Vec<PeerRef>,
    },
    NoProviders {
        key: Key,
    },
    /// No key showed up in `queue` within the queue wait.
    QueueEmpty {
        queue: &'static str,
    },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Caller side timeout for ping, get and find providers.
    pub call_timeout: Duration,
    /// Upper bound on waiting for a full or empty queue.
    pub queue_wait: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(2),
            queue_wait: Duration::from_secs(5),
        }
    }
}

/// State shared by every engine in a run.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub queues: WorkQueues,
    pub stats: Arc<ActionStats>,
    pub settings: EngineSettings,
    pub cancel: CancellationToken,
}

impl EngineContext {
    pub fn new(
        queues: WorkQueues,
        stats: Arc<ActionStats>,
        settings: EngineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queues,
            stats,
            settings,
            cancel,
        }
    }
}

pub struct ActionEngine<D: Dht> {
    node: Node<D>,
    peers: Vec<PeerRef>,
    ctx: EngineContext,
}

impl<D: Dht> ActionEngine<D> {
    pub fn new(node: Node<D>, peers: Vec<PeerRef>, ctx: EngineContext) -> Self {
        Self { node, peers, ctx }
    }

    /// Runs random actions until the context is cancelled or an action fails
    /// fatally.
    pub async fn run(&self) -> Result<()> {
        while !self.ctx.cancel.is_cancelled() {
            let action = Action::random(&mut rand::thread_rng());
            self.run_action(action).await?;
        }
        log_info!(self.node.address(), "Engine stopped");
        Ok(())
    }

    /// Runs `actions` in order. Stops early on cancellation.
    pub async fn run_script(&self, actions: &[Action]) -> Result<Vec<ActionOutcome>> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for &action in actions {
            let outcome = self.run_action(action).await?;
            let cancelled = outcome == ActionOutcome::Cancelled;
            outcomes.push(outcome);
            if cancelled {
                break;
            }
        }
        Ok(outcomes)
    }

    pub async fn run_action(&self, action: Action) -> Result<ActionOutcome> {
        log_info!(self.node.address(), "ACTION: {}", action);
        let outcome = match action {
            Action::Ping => self.ping().await,
            Action::Put => self.put().await,
            Action::Get => self.get().await?,
            Action::Provide => self.provide().await?,
            Action::FindProviders => self.find_providers().await?,
        };
        self.ctx.stats.record(&outcome);
        Ok(outcome)
    }

    async fn ping(&self) -> ActionOutcome {
        let peer = match self.peers.choose(&mut rand::thread_rng()) {
            Some(peer) => peer.clone(),
            None => {
                log_warn!(self.node.address(), "No peers to ping");
                return ActionOutcome::NoPeers;
            }
        };

        let call = self.node.dht.ping(&peer, self.ctx.settings.call_timeout);
        match self.or_cancelled(call).await {
            None => ActionOutcome::Cancelled,
            Some(Ok(())) => {
                log_info!(self.node.address(), "Pinged {}", peer);
                ActionOutcome::Pinged { peer }
            }
            Some(Err(e)) => {
                log_warn!(self.node.address(), "Ping to {} failed: {}", peer, e);
                ActionOutcome::PingFailed {
                    peer,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn put(&self) -> ActionOutcome {
        let key = Key::random();
        let value = random_token().into_bytes();

        let call = self.node.dht.put_value(&key, value.clone());
        let failure = match self.or_cancelled(call).await {
            None => return ActionOutcome::Cancelled,
            Some(Ok(())) => None,
            Some(Err(e)) => {
                log_warn!(self.node.address(), "Put of {} failed: {}", key, e);
                Some(e.to_string())
            }
        };

        let Some(enqueued) = self.hand_on(&self.ctx.queues.keys, key.clone()).await else {
            return ActionOutcome::Cancelled;
        };
        match failure {
            None => {
                log_info!(self.node.address(), "Put {} done", key);
                ActionOutcome::Stored {
                    key,
                    value,
                    enqueued,
                }
            }
            Some(reason) => ActionOutcome::PutFailed {
                key,
                reason,
                enqueued,
            },
        }
    }

    async fn get(&self) -> Result<ActionOutcome> {
        let queue = &self.ctx.queues.keys;
        let checkout = match queue
            .checkout_within(self.ctx.settings.queue_wait, &self.ctx.cancel)
            .await
        {
            Ok(checkout) => checkout,
            Err(reason) => return Ok(self.nothing_queued(queue, reason)),
        };
        let key = checkout.key().clone();

        let call = self.node.dht.get_value(&key, self.ctx.settings.call_timeout);
        let result = match self.or_cancelled(call).await {
            Some(result) => result,
            None => return Ok(ActionOutcome::Cancelled),
        };
        // Back into circulation whatever the lookup said
        checkout.restore();

        match result {
            Ok(value) => {
                log_info!(self.node.address(), "Got value for {}", key);
                Ok(ActionOutcome::Found { key, value })
            }
            Err(DhtError::SearchIncomplete) => {
                log_warn!(self.node.address(), "Didn't find value on first try ({})", key);
                Ok(ActionOutcome::SearchIncomplete { key })
            }
            Err(DhtError::NotFound) => {
                log_warn!(self.node.address(), "Failed to find value at all. ({})", key);
                Ok(ActionOutcome::NotFound { key })
            }
            Err(DhtError::Timeout) => {
                log_warn!(self.node.address(), "CAUTION: Call timed out ({})", key);
                Ok(ActionOutcome::TimedOut { key })
            }
            Err(source) => {
                log_error!(self.node.address(), "Unexpected get error for {}: {}", key, source);
                Err(FuzzError::UnexpectedGet {
                    node: self.node.address().to_string(),
                    key,
                    source,
                })
            }
        }
    }

    async fn provide(&self) -> Result<ActionOutcome> {
        let key = Key::random();

        let call = self.node.dht.provide(&key);
        match self.or_cancelled(call).await {
            None => return Ok(ActionOutcome::Cancelled),
            Some(Ok(())) => {}
            Some(Err(source)) => {
                log_error!(self.node.address(), "Provide of {} failed: {}", key, source);
                return Err(FuzzError::Provide {
                    node: self.node.address().to_string(),
                    key,
                    source,
                });
            }
        }

        let Some(enqueued) = self.hand_on(&self.ctx.queues.providers, key.clone()).await else {
            return Ok(ActionOutcome::Cancelled);
        };
        log_info!(self.node.address(), "Provided {}", key);
        Ok(ActionOutcome::Provided { key, enqueued })
    }

    async fn find_providers(&self) -> Result<ActionOutcome> {
        let queue = &self.ctx.queues.providers;
        let checkout = match queue
            .checkout_within(self.ctx.settings.queue_wait, &self.ctx.cancel)
            .await
        {
            Ok(checkout) => checkout,
            Err(reason) => return Ok(self.nothing_queued(queue, reason)),
        };
        let key = checkout.key().clone();

        let call = self
            .node
            .dht
            .find_providers(&key, self.ctx.settings.call_timeout);
        let result = match self.or_cancelled(call).await {
            Some(result) => result,
            None => return Ok(ActionOutcome::Cancelled),
        };
        checkout.restore();

        match result {
            Ok(providers) => {
                log_info!(
                    self.node.address(),
                    "Found {} provider(s) for {}",
                    providers.len(),
                    key
                );
                Ok(ActionOutcome::ProvidersFound { key, providers })
            }
            Err(DhtError::NotFound) => {
                log_warn!(self.node.address(), "Couldn't find provider. ({})", key);
                Ok(ActionOutcome::NoProviders { key })
            }
            Err(source) => {
                log_error!(
                    self.node.address(),
                    "Unexpected find providers error for {}: {}",
                    key,
                    source
                );
                Err(FuzzError::UnexpectedFindProviders {
                    node: self.node.address().to_string(),
                    key,
                    source,
                })
            }
        }
    }

    /// Pushes a fresh key, displacing the oldest queued key when the queue is
    /// full. `None` means the run was cancelled while waiting, `Some(false)`
    /// that every slot stayed checked out and the key was let go.
    async fn hand_on(&self, queue: &WorkQueue, key: Key) -> Option<bool> {
        let key = match queue.push_displacing(key) {
            Ok(None) => return Some(true),
            Ok(Some(oldest)) => {
                log_warn!(
                    self.node.address(),
                    "{} queue full, retired {}",
                    queue.name(),
                    oldest
                );
                self.ctx.stats.record_displaced();
                return Some(true);
            }
            Err(key) => key,
        };

        match queue
            .push_within(key, self.ctx.settings.queue_wait, &self.ctx.cancel)
            .await
        {
            Ok(()) => Some(true),
            Err((_, WaitError::Cancelled)) => None,
            Err((key, WaitError::TimedOut)) => {
                log_warn!(
                    self.node.address(),
                    "{} queue saturated, {} not enqueued",
                    queue.name(),
                    key
                );
                Some(false)
            }
        }
    }

    fn nothing_queued(&self, queue: &WorkQueue, reason: WaitError) -> ActionOutcome {
        match reason {
            WaitError::Cancelled => ActionOutcome::Cancelled,
            WaitError::TimedOut => {
                log_warn!(self.node.address(), "Nothing in the {} queue", queue.name());
                ActionOutcome::QueueEmpty {
                    queue: queue.name(),
                }
            }
        }
    }

    async fn or_cancelled<F: Future>(&self, call: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => None,
            output = call => Some(output),
        }
    }
}

/// Bootstraps `nodes[index]` with `connections` random peers, then runs its
/// engine until cancelled.
pub async fn run_node<D: Dht>(
    nodes: Arc<Vec<Node<D>>>,
    index: usize,
    connections: usize,
    ctx: EngineContext,
) -> Result<()> {
    let node = nodes.get(index).cloned().ok_or(FuzzError::UnknownNode(index))?;

    let mut rng = StdRng::from_entropy();
    let bootstrap = bootstrap_peers(&nodes, index, connections, &mut rng);
    let peers = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Ok(()),
        peers = bootstrap => peers?,
    };
    ctx.stats.record_bootstrap();

    ActionEngine::new(node, peers, ctx).run().await
}

/// Runs one engine per node until the context is cancelled. The first fatal
/// error cancels every other engine and is returned once all have stopped.
pub async fn run_engines<D: Dht>(
    nodes: Arc<Vec<Node<D>>>,
    connections: usize,
    ctx: EngineContext,
) -> Result<()> {
    let mut engines = JoinSet::new();
    for index in 0..nodes.len() {
        engines.spawn(run_node(nodes.clone(), index, connections, ctx.clone()));
    }

    let mut outcome = Ok(());
    while let Some(joined) = engines.join_next().await {
        let result = joined
            .map_err(|e| FuzzError::Task(e.to_string()))
            .and_then(|result| result);
        if let Err(e) = result {
            if outcome.is_ok() {
                log::error!("Stopping all engines: {}", e);
                ctx.cancel.cancel();
                outcome = Err(e);
            }
        }
    }
    outcome
}
