//! Local commit protocol and the replica state it writes to.
//!
//! Committing a liftable set is synchronous and cannot fail: the node ticks
//! its own clock entry once, wraps the operations in a [`VersionedUpdate`],
//! and folds that update through the same [`Merger`] path a remote update
//! takes. Propagation is a separate step: the caller gossips the returned
//! update.

use crate::decompose::LiftableSet;
use crate::history::CausalHistory;
use crate::merge::{MergeReport, Merger, ReplicaState};
use crate::update::{UpdateId, VersionedUpdate};
use lift_core::operation::{NodeId, Operation};
use lift_core::signature::Classifier;
use lift_core::vector_clock::VectorClock;
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// What integrating a received update did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Merged(MergeReport),
    /// The update was applied before and was dropped whole.
    Duplicate,
}

/// Per-key state, clock and retained history owned by one node.
#[derive(Clone, Debug)]
pub struct LocalReplica {
    id: NodeId,
    clock: VectorClock,
    state: ReplicaState,
    applied: BTreeSet<UpdateId>,
    history: CausalHistory,
}

impl LocalReplica {
    pub fn new(id: NodeId) -> Self {
        let mut clock = VectorClock::new();
        clock.observe(&id);
        Self {
            id,
            clock,
            state: ReplicaState::new(),
            applied: BTreeSet::new(),
            history: CausalHistory::new(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    pub fn state(&self) -> &ReplicaState {
        &self.state
    }

    pub fn history(&self) -> &CausalHistory {
        &self.history
    }

    pub fn has_applied(&self, id: &UpdateId) -> bool {
        self.applied.contains(id)
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Apply a liftable set locally and return the update to gossip.
    ///
    /// An empty set produces no update and leaves the clock untouched.
    pub fn commit_local(
        &mut self,
        liftable: LiftableSet,
        classifier: &Classifier,
    ) -> Option<VersionedUpdate> {
        if liftable.is_empty() {
            return None;
        }

        let clock = self.clock.tick(&self.id);
        let update = VersionedUpdate::new(
            UpdateId::new(),
            self.id.clone(),
            clock,
            liftable.into_operations(),
        );

        Merger::new(classifier).apply(&mut self.state, &update);
        self.applied.insert(update.id());
        self.history.insert(update.clone());

        debug!(
            node = %self.id,
            update = %update.id(),
            seq = update.sequence(),
            ops = update.len(),
            "committed locally"
        );
        Some(update)
    }

    /// Merge an update received from a peer.
    pub fn integrate(&mut self, update: &VersionedUpdate, classifier: &Classifier) -> Delivery {
        if self.applied.contains(&update.id()) {
            debug!(
                node = %self.id,
                update = %update.id(),
                origin = %update.origin(),
                "duplicate delivery detected"
            );
            return Delivery::Duplicate;
        }

        let report = Merger::new(classifier).apply(&mut self.state, update);
        self.clock.merge(update.clock());
        self.applied.insert(update.id());
        self.history.insert(update.clone());

        trace!(
            node = %self.id,
            update = %update.id(),
            applied = report.applied,
            joined = report.joined,
            "merged remote update"
        );
        Delivery::Merged(report)
    }

    pub(crate) fn apply_decided(&mut self, operations: &[Operation]) {
        self.state.apply_decided(operations);
    }

    /// Add a zero clock entry for a node that joined.
    pub fn observe_node(&mut self, node: &NodeId) {
        self.clock.observe(node);
    }

    /// Drop retained updates the whole cluster has delivered. Applied ids
    /// are kept so late duplicates are still recognised.
    pub fn prune_history(&mut self, stable: &VectorClock) -> usize {
        self.history.prune_stable(stable)
    }
}
