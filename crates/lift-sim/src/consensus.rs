//! A simulated sequencer honouring the consensus contract.
//!
//! One node acts as leader and appends proposals to a single log. Proposals
//! sent via any other node get a `NotLeader` hint; proposals from or through
//! a node cut off from the leader time out. Re-proposing an id returns the
//! original decision, so retries never allocate a second slot.
//!
//! The sequencer keeps a logical clock in network ticks. Every timed-out
//! attempt costs `timeout_ticks`, so a cut that heals at a known tick opens
//! up while the proposer is still retrying.

use crate::network::LinkState;
use async_trait::async_trait;
use lift_core::operation::NodeId;
use lift_node::consensus::{ConsensusCoordinator, Decision, Proposal, ProposalId, ProposalOutcome};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::trace;

#[derive(Debug)]
struct SequencerState {
    leader: NodeId,
    log: Vec<Decision>,
    slots: HashMap<ProposalId, u64>,
    /// Link from each node to the leader, when not open.
    cut: BTreeMap<NodeId, LinkState>,
    now: u64,
    timeout_ticks: u64,
    injected_timeouts: u32,
    attempts: u64,
}

impl SequencerState {
    fn is_cut(&self, node: &NodeId) -> bool {
        match self.cut.get(node) {
            Some(LinkState::Cut) => true,
            Some(LinkState::CutUntil(at)) => *at > self.now,
            Some(LinkState::Open) | None => false,
        }
    }

    fn time_out(&mut self) -> ProposalOutcome {
        self.now += self.timeout_ticks;
        ProposalOutcome::Timeout
    }
}

#[derive(Debug)]
pub struct SimulatedConsensus {
    state: Mutex<SequencerState>,
}

impl SimulatedConsensus {
    pub fn new(leader: NodeId) -> Self {
        Self {
            state: Mutex::new(SequencerState {
                leader,
                log: Vec::new(),
                slots: HashMap::new(),
                cut: BTreeMap::new(),
                now: 0,
                timeout_ticks: 1,
                injected_timeouts: 0,
                attempts: 0,
            }),
        }
    }

    pub fn leader(&self) -> NodeId {
        self.state.lock().leader.clone()
    }

    pub fn set_leader(&self, leader: NodeId) {
        self.state.lock().leader = leader;
    }

    /// Nodes whose proposals time out until further notice.
    pub fn set_unreachable(&self, nodes: impl IntoIterator<Item = NodeId>) {
        self.set_links(nodes.into_iter().map(|node| (node, LinkState::Cut)));
    }

    /// Replace the state of every node's link to the leader.
    pub fn set_links(&self, links: impl IntoIterator<Item = (NodeId, LinkState)>) {
        self.state.lock().cut = links
            .into_iter()
            .filter(|(_, link)| *link != LinkState::Open)
            .collect();
    }

    /// Nodes whose proposals time out at the current tick.
    pub fn unreachable(&self) -> BTreeSet<NodeId> {
        let state = self.state.lock();
        state
            .cut
            .keys()
            .filter(|node| state.is_cut(node))
            .cloned()
            .collect()
    }

    /// Logical time, in network ticks.
    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    /// Move the clock up to `now`; never backwards.
    pub fn sync_time(&self, now: u64) {
        let mut state = self.state.lock();
        state.now = state.now.max(now);
    }

    /// Ticks a timed-out attempt takes.
    pub fn set_timeout_ticks(&self, ticks: u64) {
        self.state.lock().timeout_ticks = ticks;
    }

    /// Make the next `count` attempts time out regardless of reachability.
    pub fn inject_timeouts(&self, count: u32) {
        self.state.lock().injected_timeouts += count;
    }

    /// Number of decided slots.
    pub fn decided_count(&self) -> usize {
        self.state.lock().log.len()
    }

    /// The decided log, in slot order.
    pub fn log(&self) -> Vec<Decision> {
        self.state.lock().log.clone()
    }

    /// Total propose calls seen, including retries and redirects.
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }
}

#[async_trait]
impl ConsensusCoordinator for SimulatedConsensus {
    async fn propose(&self, via: &NodeId, proposal: &Proposal) -> ProposalOutcome {
        let mut state = self.state.lock();
        state.attempts += 1;

        if state.injected_timeouts > 0 {
            state.injected_timeouts -= 1;
            return state.time_out();
        }
        if state.is_cut(&proposal.origin) || state.is_cut(via) {
            return state.time_out();
        }
        if *via != state.leader {
            return ProposalOutcome::NotLeader {
                leader: Some(state.leader.clone()),
            };
        }

        if let Some(&slot) = state.slots.get(&proposal.id) {
            if let Some(decision) = state.log.get(slot as usize) {
                return ProposalOutcome::Decided(decision.clone());
            }
        }

        let slot = state.log.len() as u64;
        let decision = Decision {
            slot,
            proposal: proposal.clone(),
        };
        state.log.push(decision.clone());
        state.slots.insert(proposal.id, slot);
        trace!(proposal = %proposal.id, slot, "sequenced proposal");
        ProposalOutcome::Decided(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lift_core::operation::Operation;
    use lift_core::vector_clock::VectorClock;

    fn proposal(id: u128, origin: &str) -> Proposal {
        Proposal {
            id: ProposalId::from_u128(id),
            origin: NodeId::from(origin),
            operations: vec![Operation::overwrite("k", "v")],
            clock: VectorClock::new(),
        }
    }

    #[test]
    fn test_non_leader_gets_hint() {
        let seq = SimulatedConsensus::new(NodeId::from("leader"));
        let outcome = tokio_test::block_on(seq.propose(&NodeId::from("a"), &proposal(1, "a")));
        assert_eq!(
            outcome,
            ProposalOutcome::NotLeader {
                leader: Some(NodeId::from("leader"))
            }
        );
    }

    #[test]
    fn test_reproposal_returns_same_slot() {
        let leader = NodeId::from("leader");
        let seq = SimulatedConsensus::new(leader.clone());

        let first = tokio_test::block_on(seq.propose(&leader, &proposal(1, "a")));
        let other = tokio_test::block_on(seq.propose(&leader, &proposal(2, "b")));
        let again = tokio_test::block_on(seq.propose(&leader, &proposal(1, "a")));

        assert_eq!(first, again);
        assert!(matches!(other, ProposalOutcome::Decided(Decision { slot: 1, .. })));
        assert_eq!(seq.decided_count(), 2);
    }

    #[test]
    fn test_unreachable_origin_times_out() {
        let leader = NodeId::from("leader");
        let seq = SimulatedConsensus::new(leader.clone());
        seq.set_unreachable([NodeId::from("a")]);

        let outcome = tokio_test::block_on(seq.propose(&leader, &proposal(1, "a")));
        assert_eq!(outcome, ProposalOutcome::Timeout);

        seq.set_unreachable(Vec::new());
        seq.inject_timeouts(1);
        let outcome = tokio_test::block_on(seq.propose(&leader, &proposal(1, "a")));
        assert_eq!(outcome, ProposalOutcome::Timeout);
        assert_eq!(seq.attempts(), 2);
    }

    #[test]
    fn test_timed_cut_opens_as_attempts_time_out() {
        let leader = NodeId::from("leader");
        let seq = SimulatedConsensus::new(leader.clone());
        seq.set_timeout_ticks(2);
        seq.set_links([(NodeId::from("a"), LinkState::CutUntil(4))]);

        let attempt = || tokio_test::block_on(seq.propose(&leader, &proposal(1, "a")));
        assert_eq!(attempt(), ProposalOutcome::Timeout);
        assert_eq!(seq.now(), 2);
        assert_eq!(attempt(), ProposalOutcome::Timeout);
        assert_eq!(seq.now(), 4);
        assert!(seq.unreachable().is_empty());
        assert!(matches!(attempt(), ProposalOutcome::Decided(Decision { slot: 0, .. })));

        seq.sync_time(1);
        assert_eq!(seq.now(), 4);
    }
}
