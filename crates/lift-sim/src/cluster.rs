//! A cluster of Lift nodes over the simulated network.
//!
//! The cluster plays the role of the transport and of the consensus client
//! for every node: it gossips the updates `submit` returns, drives proposals
//! through the [`SimulatedConsensus`] sequencer, and broadcasts the
//! resulting decisions.

use crate::consensus::SimulatedConsensus;
use crate::network::{LinkState, NetworkConfig, NetworkStats, SimNetwork};
use futures::future::join_all;
use lift_core::operation::{NodeId, Transaction};
use lift_core::signature::Classifier;
use lift_node::config::NodeConfig;
use lift_node::consensus::{Proposal, ProposalDriver, ProposalId};
use lift_node::digest::StateDigest;
use lift_node::message::GossipMessage;
use lift_node::node::{CommitResult, Node, ReceiveOutcome, Submission};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cluster configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub nodes: usize,
    /// Seed for every random choice the network makes.
    pub seed: u64,
    pub network: NetworkConfig,
    pub node: NodeConfig,
    /// Upper bound on deliveries per `run_until_quiescent`.
    pub max_steps: usize,
    /// Logical ticks one timed-out consensus attempt takes.
    pub timeout_ticks: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            seed: 42,
            network: NetworkConfig::default(),
            node: NodeConfig::default(),
            max_steps: 100_000,
            timeout_ticks: 1,
        }
    }
}

/// Outcome of draining the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuiescenceReport {
    pub steps: usize,
    pub duplicates: usize,
    /// Logical time when the run stopped.
    pub time: u64,
    /// False if the step budget ran out or messages are still parked.
    pub quiescent: bool,
}

/// Transaction-level counters across the whole cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClusterStats {
    pub transactions: usize,
    pub operations: usize,
    pub lifted_operations: usize,
    pub proposals: usize,
    pub committed_proposals: usize,
    pub failed_proposals: usize,
}

impl ClusterStats {
    /// Fraction of all submitted operations that committed without consensus.
    pub fn lifting_fraction(&self) -> f64 {
        if self.operations == 0 {
            1.0
        } else {
            self.lifted_operations as f64 / self.operations as f64
        }
    }
}

pub struct SimulatedCluster {
    config: ClusterConfig,
    classifier: Arc<Classifier>,
    nodes: Vec<Node>,
    network: SimNetwork<GossipMessage>,
    consensus: Arc<SimulatedConsensus>,
    driver: ProposalDriver<SimulatedConsensus>,
    queued: VecDeque<(usize, Proposal)>,
    results: BTreeMap<ProposalId, CommitResult>,
    stats: ClusterStats,
}

impl SimulatedCluster {
    pub fn new(config: ClusterConfig) -> Self {
        Self::with_classifier(config, Classifier::standard())
    }

    pub fn with_classifier(config: ClusterConfig, classifier: Classifier) -> Self {
        let classifier = Arc::new(classifier);
        let ids: Vec<NodeId> = (0..config.nodes.max(1)).map(node_name).collect();

        let nodes = ids
            .iter()
            .map(|id| {
                let mut node = Node::new(id.clone(), classifier.clone(), config.node.clone());
                for peer in ids.iter().filter(|peer| *peer != id) {
                    node.register_peer(peer.clone());
                }
                node
            })
            .collect();

        let consensus = Arc::new(SimulatedConsensus::new(ids[0].clone()));
        consensus.set_timeout_ticks(config.timeout_ticks);
        let driver = ProposalDriver::new(consensus.clone(), config.node.retry.clone());
        let network = SimNetwork::new(config.network.clone(), config.seed);

        Self {
            config,
            classifier,
            nodes,
            network,
            consensus,
            driver,
            queued: VecDeque::new(),
            results: BTreeMap::new(),
            stats: ClusterStats::default(),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_index(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == id)
    }

    pub fn network(&self) -> &SimNetwork<GossipMessage> {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SimNetwork<GossipMessage> {
        &mut self.network
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.network.stats()
    }

    pub fn consensus(&self) -> &SimulatedConsensus {
        &self.consensus
    }

    pub fn stats(&self) -> ClusterStats {
        self.stats
    }

    /// Final result of a proposal driven by [`resolve_proposals`](Self::resolve_proposals).
    pub fn result(&self, id: &ProposalId) -> Option<&CommitResult> {
        self.results.get(id)
    }

    /// Proposals submitted but not yet driven.
    pub fn queued_proposals(&self) -> usize {
        self.queued.len()
    }

    /// Submit at node `idx`, gossip the liftable update and queue the
    /// coordinated part.
    pub fn submit(&mut self, idx: usize, transaction: Transaction) -> Submission {
        let operations = transaction.len();
        let submission = self.nodes[idx].submit(transaction);

        self.stats.transactions += 1;
        self.stats.operations += operations;
        self.stats.lifted_operations += submission.update.as_ref().map_or(0, |u| u.len());

        if let Some(update) = &submission.update {
            self.broadcast(idx, GossipMessage::Update(update.clone()));
        }
        if let Some(proposal) = &submission.proposal {
            self.stats.proposals += 1;
            self.queued.push_back((idx, proposal.clone()));
        }
        submission
    }

    /// Send `message` from node `from` to every other node.
    pub fn broadcast(&mut self, from: usize, message: GossipMessage) {
        let sender = self.nodes[from].id().clone();
        for to in self.nodes.iter().map(|n| n.id().clone()) {
            if to != sender {
                self.network.send(sender.clone(), to, message.clone());
            }
        }
    }

    /// Drive every queued proposal concurrently, complete them at their
    /// origin and broadcast the decisions.
    ///
    /// Timed-out attempts move logical time, so a timed partition can heal
    /// before the retry budget runs out. The network catches up afterwards.
    pub async fn resolve_proposals(&mut self) -> Vec<(ProposalId, CommitResult)> {
        self.consensus.sync_time(self.network.now());
        self.refresh_reachability();
        let batch: Vec<(usize, Proposal)> = self.queued.drain(..).collect();
        let outcomes = join_all(batch.iter().map(|(_, p)| self.driver.drive(p))).await;

        let elapsed = self.consensus.now().saturating_sub(self.network.now());
        if elapsed > 0 {
            debug!(elapsed, "consensus retries advanced logical time");
            self.network.advance(elapsed);
            self.refresh_reachability();
        }

        let mut resolved = Vec::with_capacity(batch.len());
        for ((idx, proposal), outcome) in batch.into_iter().zip(outcomes) {
            let decision = outcome.as_ref().ok().cloned();
            let result = match self.nodes[idx].complete_proposal(proposal.id, outcome) {
                Ok(result) => result,
                Err(err) => {
                    warn!(proposal = %proposal.id, %err, "could not complete proposal");
                    continue;
                }
            };

            if result.is_committed() {
                self.stats.committed_proposals += 1;
            } else {
                self.stats.failed_proposals += 1;
            }
            if let Some(decision) = decision {
                self.broadcast(idx, GossipMessage::Decided(decision));
            }
            self.results.insert(proposal.id, result.clone());
            resolved.push((proposal.id, result));
        }
        resolved
    }

    /// Deliver one message. Returns `None` when nothing is deliverable.
    pub fn step(&mut self) -> Option<ReceiveOutcome> {
        let envelope = self.network.next_delivery()?;
        self.refresh_reachability();
        let idx = self.node_index(&envelope.to)?;
        Some(self.nodes[idx].receive(envelope.message))
    }

    /// Deliver messages until none is deliverable or the step budget runs out.
    pub fn run_until_quiescent(&mut self) -> QuiescenceReport {
        let mut report = QuiescenceReport::default();
        while report.steps < self.config.max_steps {
            match self.step() {
                Some(outcome) => {
                    report.steps += 1;
                    if outcome == ReceiveOutcome::Duplicate {
                        report.duplicates += 1;
                    }
                }
                None => break,
            }
        }
        report.time = self.network.now();
        report.quiescent = self.network.is_quiescent();
        report
    }

    /// Resolve queued proposals and drain the network until both are empty.
    pub async fn settle(&mut self) -> QuiescenceReport {
        let mut total = QuiescenceReport::default();
        loop {
            self.resolve_proposals().await;
            let report = self.run_until_quiescent();
            total.steps += report.steps;
            total.duplicates += report.duplicates;
            total.time = report.time;
            total.quiescent = report.quiescent;
            if self.queued.is_empty() {
                return total;
            }
        }
    }

    /// Cut the given nodes off from the rest, optionally for `duration` ticks.
    pub fn partition(&mut self, indices: &[usize], duration: Option<u64>) {
        let side: Vec<NodeId> = indices.iter().map(|&i| self.nodes[i].id().clone()).collect();
        self.network.partition(side, duration);
        self.refresh_reachability();
    }

    pub fn heal(&mut self) {
        self.network.heal_all();
        self.refresh_reachability();
    }

    /// Add a node. It announces itself and receives the retained history
    /// and every decision so far. Returns its index.
    pub fn add_node(&mut self) -> usize {
        let idx = self.nodes.len();
        let id = node_name(idx);
        let mut node = Node::new(id.clone(), self.classifier.clone(), self.config.node.clone());
        for peer in &self.nodes {
            node.register_peer(peer.id().clone());
        }
        self.nodes.push(node);
        info!(node = %id, "node added to cluster");

        let join = self.nodes[idx].join_announcement();
        self.broadcast(idx, join);

        let leader = self.consensus.leader();
        for from in 0..idx {
            let updates: Vec<_> = self.nodes[from].retained_updates().cloned().collect();
            let sender = self.nodes[from].id().clone();
            for update in updates {
                self.network
                    .send(sender.clone(), id.clone(), GossipMessage::Update(update));
            }
        }
        for decision in self.consensus.log() {
            self.network
                .send(leader.clone(), id.clone(), GossipMessage::Decided(decision));
        }
        idx
    }

    /// Every node re-sends its retained history to every other node.
    pub fn anti_entropy_round(&mut self) {
        for from in 0..self.nodes.len() {
            let updates: Vec<_> = self.nodes[from].retained_updates().cloned().collect();
            for update in updates {
                self.broadcast(from, GossipMessage::Update(update));
            }
        }
    }

    /// Every node broadcasts its delivery frontier.
    pub fn announce_frontiers(&mut self) {
        for from in 0..self.nodes.len() {
            let frontier = self.nodes[from].frontier_announcement();
            self.broadcast(from, frontier);
        }
    }

    /// Collect stable history on every node; returns the total removed.
    pub fn collect_garbage(&mut self) -> usize {
        self.nodes.iter_mut().map(Node::collect_garbage).sum()
    }

    pub fn digests(&self) -> Vec<(NodeId, StateDigest)> {
        self.nodes
            .iter()
            .map(|n| (n.id().clone(), n.digest()))
            .collect()
    }

    /// All nodes hold bit-identical state and have applied the same
    /// decisions.
    pub fn is_converged(&self) -> bool {
        let Some(first) = self.nodes.first() else {
            return true;
        };
        let digest = first.digest();
        let slot = first.decisions().next_slot();
        self.nodes
            .iter()
            .all(|n| n.digest() == digest && n.decisions().next_slot() == slot)
    }

    pub fn assert_converged(&self) {
        if self.is_converged() {
            return;
        }
        let report: Vec<String> = self
            .nodes
            .iter()
            .map(|n| {
                format!(
                    "{}: digest {} slots {} retained {}",
                    n.id(),
                    n.digest().short(),
                    n.decisions().next_slot(),
                    n.history().len()
                )
            })
            .collect();
        panic!("cluster did not converge:\n  {}", report.join("\n  "));
    }

    /// Nodes cut off from the leader cannot reach consensus until the cut
    /// heals.
    fn refresh_reachability(&self) {
        let leader = self.consensus.leader();
        let links: Vec<(NodeId, LinkState)> = self
            .nodes
            .iter()
            .map(|n| (n.id().clone(), self.network.link_state(n.id(), &leader)))
            .collect();
        self.consensus.set_links(links);
    }
}

fn node_name(idx: usize) -> NodeId {
    NodeId::new(format!("node-{}", idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lift_core::operation::{Key, Operation};

    #[test]
    fn test_config_loads_partial_json() {
        let config: ClusterConfig =
            serde_json::from_str(r#"{"nodes": 5, "network": {"dup_rate": 0.5}}"#).unwrap();
        assert_eq!(config.nodes, 5);
        assert_eq!(config.seed, 42);
        assert_eq!(config.network.dup_rate, 0.5);
        assert_eq!(config.node, NodeConfig::default());
    }

    #[tokio::test]
    async fn test_submit_gossips_and_converges() {
        let mut cluster = SimulatedCluster::new(ClusterConfig::default());
        cluster.submit(0, Transaction::new().with(Operation::increment("n", 1)));
        cluster.submit(2, Transaction::new().with(Operation::increment("n", 3)));

        let report = cluster.settle().await;
        assert!(report.quiescent);
        cluster.assert_converged();
        assert_eq!(cluster.node(1).state().counter(&Key::from("n")), Some(4));
    }

    #[test]
    fn test_partition_marks_minority_unreachable() {
        let mut cluster = SimulatedCluster::new(ClusterConfig::default());
        cluster.partition(&[2], None);
        assert!(cluster.consensus().unreachable().contains(&NodeId::from("node-2")));

        cluster.heal();
        assert!(cluster.consensus().unreachable().is_empty());
    }
}
