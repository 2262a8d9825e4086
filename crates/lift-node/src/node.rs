//! A Lift node: the public entry point for transactions and gossip.
//!
//! ```text
//! submit(tx) ──► Decomposer ──┬─► liftable ──► commit_local ──► VersionedUpdate (gossip)
//!                             └─► coordinated ──► Proposal (consensus)
//!
//! receive(msg) ──► Update   ──► Merger
//!                  Decided  ──► DecisionLog ──► apply in slot order
//!                  Join     ──► clock dimension + stability peer
//!                  Frontier ──► StabilityMonitor
//! ```
//!
//! The node owns its state outright. It never talks to the network or to
//! consensus itself: `submit` hands back the update to gossip and the
//! proposal to drive, and `complete_proposal` takes the outcome.

use crate::commit::{Delivery, LocalReplica};
use crate::config::NodeConfig;
use crate::consensus::{Decision, DecisionLog, DecisionStatus, Proposal, ProposalId};
use crate::decompose::{Decomposer, Decomposition, Escalation, LiftableSet, PendingIndex};
use crate::digest::StateDigest;
use crate::error::{NodeError, Result};
use crate::history::CausalHistory;
use crate::merge::{MergeReport, ReplicaState};
use crate::message::GossipMessage;
use crate::stability::StabilityMonitor;
use crate::update::{UpdateId, VersionedUpdate};
use lift_core::operation::{NodeId, Transaction};
use lift_core::signature::{ClassifiedOperation, Classifier};
use lift_core::vector_clock::VectorClock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immediate acknowledgement of a submitted transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitAck {
    /// Everything committed locally.
    LocalAck,
    /// The liftable part committed; the rest waits on this proposal.
    Pending(ProposalId),
}

/// Where a committed transaction's effects were ordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitScope {
    LocalOnly,
    WithConsensus { slot: u64 },
}

/// Final outcome of a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitResult {
    Committed(CommitScope),
    /// The coordinated part failed. The liftable part stays committed and
    /// its update is named here.
    Failed {
        reason: NodeError,
        retained_local: Option<UpdateId>,
    },
}

impl CommitResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitResult::Committed(_))
    }
}

/// Everything `submit` produced.
#[derive(Clone, Debug)]
pub struct Submission {
    pub ack: SubmitAck,
    /// Update to gossip, if anything was liftable.
    pub update: Option<VersionedUpdate>,
    /// Proposal to drive through consensus, if anything was coordinated.
    pub proposal: Option<Proposal>,
    pub lifting_fraction: f64,
    pub escalations: Vec<Escalation>,
}

impl Submission {
    /// The final result when nothing needed coordination.
    pub fn local_result(&self) -> Option<CommitResult> {
        match self.ack {
            SubmitAck::LocalAck => Some(CommitResult::Committed(CommitScope::LocalOnly)),
            SubmitAck::Pending(_) => None,
        }
    }
}

/// What handling one gossip message did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Merged(MergeReport),
    Duplicate,
    DecisionApplied { count: usize },
    /// The slot carried a proposal applied earlier; its operations were skipped.
    DecisionReplayed,
    DecisionBuffered,
    DecisionDuplicate,
    PeerJoined(NodeId),
    FrontierUpdated,
}

#[derive(Clone, Debug)]
struct PendingProposal {
    proposal: Proposal,
    classified: Vec<ClassifiedOperation>,
    retained_local: Option<UpdateId>,
}

pub struct Node {
    config: NodeConfig,
    classifier: Arc<Classifier>,
    replica: LocalReplica,
    stability: StabilityMonitor,
    pending: BTreeMap<ProposalId, PendingProposal>,
    decisions: DecisionLog,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, classifier: Arc<Classifier>, config: NodeConfig) -> Self {
        let id = id.into();
        Self {
            config,
            classifier,
            replica: LocalReplica::new(id.clone()),
            stability: StabilityMonitor::new(id),
            pending: BTreeMap::new(),
            decisions: DecisionLog::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        self.replica.id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn clock(&self) -> &VectorClock {
        self.replica.clock()
    }

    pub fn state(&self) -> &ReplicaState {
        self.replica.state()
    }

    pub fn digest(&self) -> StateDigest {
        self.replica.state().digest()
    }

    pub fn history(&self) -> &CausalHistory {
        self.replica.history()
    }

    pub fn stability(&self) -> &StabilityMonitor {
        &self.stability
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.decisions
    }

    pub fn has_applied(&self, id: &UpdateId) -> bool {
        self.replica.has_applied(id)
    }

    pub fn pending_proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.pending.values().map(|p| &p.proposal)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Track a peer for stability and add its clock dimension.
    pub fn register_peer(&mut self, peer: NodeId) {
        self.replica.observe_node(&peer);
        self.stability.register_peer(peer);
    }

    fn pending_index(&self) -> PendingIndex {
        let mut index = PendingIndex::new();
        for (id, pending) in &self.pending {
            index.add(*id, &pending.classified);
        }
        index
    }

    /// Split a transaction without committing anything.
    pub fn decompose(&self, transaction: &Transaction) -> Decomposition {
        Decomposer::new(&self.classifier, self.config.escalation)
            .decompose(transaction, &self.pending_index())
    }

    /// Commit the liftable part and prepare the coordinated part.
    ///
    /// Returns as soon as the liftable part is applied locally.
    pub fn submit(&mut self, transaction: Transaction) -> Submission {
        let decomposition = self.decompose(&transaction);
        let lifting_fraction = decomposition.lifting_fraction();
        let escalations = decomposition.escalations;
        let coordinated = decomposition.coordinated;

        let update = self.commit_local(decomposition.liftable);

        let proposal = if coordinated.is_empty() {
            None
        } else {
            let classified = coordinated.operations().to_vec();
            let proposal = Proposal {
                id: ProposalId::new(),
                origin: self.id().clone(),
                operations: coordinated.into_operations(),
                clock: self.replica.clock().clone(),
            };
            info!(
                node = %self.id(),
                proposal = %proposal.id,
                ops = proposal.operations.len(),
                lifting_fraction,
                "coordinated operations proposed"
            );
            self.pending.insert(
                proposal.id,
                PendingProposal {
                    proposal: proposal.clone(),
                    classified,
                    retained_local: update.as_ref().map(VersionedUpdate::id),
                },
            );
            Some(proposal)
        };

        let ack = match &proposal {
            Some(p) => SubmitAck::Pending(p.id),
            None => SubmitAck::LocalAck,
        };

        Submission {
            ack,
            update,
            proposal,
            lifting_fraction,
            escalations,
        }
    }

    /// Apply a liftable set and return the update to gossip.
    pub fn commit_local(&mut self, liftable: LiftableSet) -> Option<VersionedUpdate> {
        let update = self.replica.commit_local(liftable, &self.classifier);
        if update.is_some() {
            self.refresh_local_frontier();
        }
        update
    }

    /// Handle one gossip message.
    pub fn receive(&mut self, message: GossipMessage) -> ReceiveOutcome {
        match message {
            GossipMessage::Update(update) => {
                self.stability.register_peer(update.origin().clone());
                match self.replica.integrate(&update, &self.classifier) {
                    Delivery::Merged(report) => {
                        self.refresh_local_frontier();
                        ReceiveOutcome::Merged(report)
                    }
                    Delivery::Duplicate => ReceiveOutcome::Duplicate,
                }
            }
            GossipMessage::Decided(decision) => match self.accept_decision(decision) {
                DecisionStatus::Ready(applied) => ReceiveOutcome::DecisionApplied {
                    count: applied.len(),
                },
                DecisionStatus::Replayed => ReceiveOutcome::DecisionReplayed,
                DecisionStatus::Buffered => ReceiveOutcome::DecisionBuffered,
                DecisionStatus::Duplicate => ReceiveOutcome::DecisionDuplicate,
            },
            GossipMessage::Join { node } => {
                info!(node = %self.id(), peer = %node, "peer joined");
                self.register_peer(node.clone());
                ReceiveOutcome::PeerJoined(node)
            }
            GossipMessage::Frontier { node, delivered } => {
                self.replica.observe_node(&node);
                self.stability.update_peer_frontier(node, &delivered);
                ReceiveOutcome::FrontierUpdated
            }
        }
    }

    /// Record the outcome of driving one of this node's proposals.
    ///
    /// A decided proposal is applied (once its slot is reached); a failed
    /// one is reported together with the liftable update that stays
    /// committed.
    pub fn complete_proposal(
        &mut self,
        id: ProposalId,
        outcome: Result<Decision>,
    ) -> Result<CommitResult> {
        let pending = self
            .pending
            .remove(&id)
            .ok_or(NodeError::UnknownProposal(id))?;

        match outcome {
            Ok(decision) => {
                let slot = decision.slot;
                self.accept_decision(decision);
                Ok(CommitResult::Committed(CommitScope::WithConsensus { slot }))
            }
            Err(reason) => {
                warn!(
                    node = %self.id(),
                    proposal = %id,
                    %reason,
                    retained_local = ?pending.retained_local,
                    "coordinated part failed, liftable part stays committed"
                );
                Ok(CommitResult::Failed {
                    reason,
                    retained_local: pending.retained_local,
                })
            }
        }
    }

    fn accept_decision(&mut self, decision: Decision) -> DecisionStatus {
        let status = self.decisions.accept(decision);
        match &status {
            DecisionStatus::Ready(ready) => {
                for decision in ready {
                    debug!(
                        node = %self.id(),
                        slot = decision.slot,
                        proposal = %decision.proposal.id,
                        "applying decision"
                    );
                    self.replica.apply_decided(&decision.proposal.operations);
                }
            }
            DecisionStatus::Buffered => {
                debug!(node = %self.id(), next = self.decisions.next_slot(), "decision buffered behind gap");
            }
            DecisionStatus::Replayed | DecisionStatus::Duplicate => {}
        }
        status
    }

    pub fn join_announcement(&self) -> GossipMessage {
        GossipMessage::Join {
            node: self.id().clone(),
        }
    }

    pub fn frontier_announcement(&self) -> GossipMessage {
        GossipMessage::Frontier {
            node: self.id().clone(),
            delivered: self.history().delivered().contiguous().clone(),
        }
    }

    /// Updates still retained, for re-sending to peers.
    pub fn retained_updates(&self) -> impl Iterator<Item = &VersionedUpdate> {
        self.history().iter()
    }

    /// Prune history covered by the stable frontier.
    pub fn collect_garbage(&mut self) -> usize {
        let stable = self.stability.stable_frontier().clone();
        let removed = self.replica.prune_history(&stable);
        if removed > 0 {
            info!(
                node = %self.id(),
                removed,
                retained = self.history().len(),
                "collected stable history"
            );
        }
        removed
    }

    fn refresh_local_frontier(&mut self) {
        let frontier = self.replica.history().delivered().contiguous().clone();
        self.stability.update_local_frontier(frontier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lift_core::operation::{Key, Operation};

    fn node(id: &str) -> Node {
        Node::new(id, Arc::new(Classifier::standard()), NodeConfig::default())
    }

    #[test]
    fn test_algebraic_submit_acks_locally() {
        let mut a = node("a");
        let submission = a.submit(Transaction::new().with(Operation::increment("n", 2)));

        assert_eq!(submission.ack, SubmitAck::LocalAck);
        assert_eq!(submission.lifting_fraction, 1.0);
        assert_eq!(
            submission.local_result(),
            Some(CommitResult::Committed(CommitScope::LocalOnly))
        );
        assert!(submission.proposal.is_none());
        assert_eq!(a.state().counter(&Key::from("n")), Some(2));
    }

    #[test]
    fn test_cart_increment_visible_while_status_pending() {
        let mut a = node("a");
        let submission = a.submit(
            Transaction::new()
                .with(Operation::increment("cart_count", 1))
                .with(Operation::overwrite("order_status", "confirmed")),
        );

        let SubmitAck::Pending(id) = submission.ack else {
            panic!("expected pending ack");
        };
        assert_eq!(a.state().counter(&Key::from("cart_count")), Some(1));
        assert_eq!(a.state().register(&Key::from("order_status")), None);

        let proposal = submission.proposal.clone().unwrap();
        let result = a
            .complete_proposal(id, Ok(Decision { slot: 0, proposal }))
            .unwrap();
        assert_eq!(result, CommitResult::Committed(CommitScope::WithConsensus { slot: 0 }));
        assert_eq!(a.state().register(&Key::from("order_status")), Some("confirmed"));
    }

    #[test]
    fn test_failed_proposal_keeps_liftable_part() {
        let mut a = node("a");
        let submission = a.submit(
            Transaction::new()
                .with(Operation::increment("n", 1))
                .with(Operation::overwrite("s", "x")),
        );
        let id = submission.proposal.as_ref().unwrap().id;
        let reason = NodeError::Unavailable {
            proposal: id,
            attempts: 3,
            redirects: 0,
        };

        let result = a.complete_proposal(id, Err(reason.clone())).unwrap();
        assert_eq!(
            result,
            CommitResult::Failed {
                reason,
                retained_local: submission.update.as_ref().map(VersionedUpdate::id),
            }
        );
        assert_eq!(a.state().counter(&Key::from("n")), Some(1));
        assert_eq!(a.pending_count(), 0);
        assert!(matches!(
            a.complete_proposal(id, Err(NodeError::UnknownProposal(id))),
            Err(NodeError::UnknownProposal(_))
        ));
    }

    #[test]
    fn test_pending_generic_holds_key_until_resolved() {
        let mut a = node("a");
        let first = a.submit(Transaction::new().with(Operation::overwrite("k", "v")));
        let blocked = a.submit(Transaction::new().with(Operation::increment("k", 1)));
        assert!(matches!(blocked.ack, SubmitAck::Pending(_)));

        let proposal = first.proposal.unwrap();
        a.complete_proposal(proposal.id, Ok(Decision { slot: 0, proposal }))
            .unwrap();

        let blocked_id = blocked.proposal.unwrap().id;
        a.complete_proposal(blocked_id, Err(NodeError::UnknownProposal(blocked_id)))
            .unwrap();

        let freed = a.submit(Transaction::new().with(Operation::increment("k", 1)));
        assert_eq!(freed.ack, SubmitAck::LocalAck);
    }

    #[test]
    fn test_gossip_between_two_nodes() {
        let mut a = node("a");
        let mut b = node("b");

        let ua = a.submit(Transaction::new().with(Operation::increment("n", 1)));
        let ub = b.submit(Transaction::new().with(Operation::increment("n", 3)));

        let to_b = GossipMessage::Update(ua.update.unwrap());
        let to_a = GossipMessage::Update(ub.update.unwrap());

        assert!(matches!(b.receive(to_b.clone()), ReceiveOutcome::Merged(_)));
        assert_eq!(b.receive(to_b), ReceiveOutcome::Duplicate);
        a.receive(to_a);

        assert_eq!(a.state().counter(&Key::from("n")), Some(4));
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_garbage_collection_waits_for_every_peer() {
        let mut a = node("a");
        let mut b = node("b");
        a.register_peer(b.id().clone());
        b.register_peer(a.id().clone());

        let update = a
            .submit(Transaction::new().with(Operation::increment("n", 1)))
            .update
            .unwrap();
        assert_eq!(a.collect_garbage(), 0);

        b.receive(GossipMessage::Update(update));
        a.receive(b.frontier_announcement());
        assert_eq!(a.collect_garbage(), 1);
        assert!(a.history().is_empty());
    }

    #[test]
    fn test_proposal_decided_at_two_slots_applies_once() {
        let mut a = node("a");
        let mut b = node("b");
        let submission = a.submit(
            Transaction::new()
                .with(Operation::increment("k", 1))
                .with(Operation::overwrite("k", "r")),
        );
        assert_eq!(submission.lifting_fraction, 0.0);
        let proposal = submission.proposal.unwrap();
        let later = a.submit(Transaction::new().with(Operation::overwrite("k", "s")));
        let later = later.proposal.unwrap();

        let decided = |slot, proposal: &Proposal| {
            GossipMessage::Decided(Decision {
                slot,
                proposal: proposal.clone(),
            })
        };
        assert_eq!(
            b.receive(decided(0, &proposal)),
            ReceiveOutcome::DecisionApplied { count: 1 }
        );
        assert_eq!(b.receive(decided(1, &later)), ReceiveOutcome::DecisionApplied { count: 1 });
        assert_eq!(b.receive(decided(2, &proposal)), ReceiveOutcome::DecisionReplayed);

        assert_eq!(b.state().counter(&Key::from("k")), Some(1));
        assert_eq!(b.state().register(&Key::from("k")), Some("s"));
        assert_eq!(b.decisions().next_slot(), 3);
        assert_eq!(b.decisions().replayed_count(), 1);
    }

    #[test]
    fn test_join_adds_clock_dimension() {
        let mut a = node("a");
        let outcome = a.receive(GossipMessage::Join {
            node: NodeId::from("z"),
        });
        assert_eq!(outcome, ReceiveOutcome::PeerJoined(NodeId::from("z")));
        assert!(a.clock().nodes().any(|n| n.as_str() == "z"));
        assert_eq!(a.stability().peer_count(), 1);
    }
}
