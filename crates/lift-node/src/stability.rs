//! Causal stability tracking for history garbage collection.
//!
//! An update is stable once every known node has delivered it. Each node
//! periodically announces its delivery frontier; the stable frontier is the
//! pointwise minimum of the local frontier and every peer's last announced
//! frontier. Peers that joined but never announced hold the frontier at
//! zero.

use lift_core::operation::NodeId;
use lift_core::vector_clock::VectorClock;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Delivery status of one update across the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StabilityState {
    /// Not delivered anywhere we know of.
    Pending,

    /// Delivered to some but not all nodes.
    Partial {
        delivered_to: BTreeSet<NodeId>,
        pending_for: BTreeSet<NodeId>,
    },

    /// Delivered to all tracked nodes - safe to collect.
    Stable,
}

/// Tracks delivery frontiers of the local node and its peers.
#[derive(Clone, Debug)]
pub struct StabilityMonitor {
    node_id: NodeId,
    local_frontier: VectorClock,
    peer_frontiers: BTreeMap<NodeId, VectorClock>,
    stable_frontier: VectorClock,
}

impl StabilityMonitor {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            local_frontier: VectorClock::new(),
            peer_frontiers: BTreeMap::new(),
            stable_frontier: VectorClock::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Start tracking a peer with an empty frontier. Known peers are kept.
    pub fn register_peer(&mut self, peer: NodeId) {
        if peer == self.node_id {
            return;
        }
        self.peer_frontiers.entry(peer).or_default();
        self.recompute_stable_frontier();
    }

    pub fn update_local_frontier(&mut self, frontier: VectorClock) {
        self.local_frontier = frontier;
        self.recompute_stable_frontier();
    }

    /// Record a peer's announced frontier. Frontiers only move forward, so
    /// a stale announcement delivered late is merged rather than replacing
    /// the newer one.
    pub fn update_peer_frontier(&mut self, peer: NodeId, frontier: &VectorClock) {
        if peer == self.node_id {
            return;
        }
        self.peer_frontiers.entry(peer).or_default().merge(frontier);
        self.recompute_stable_frontier();
    }

    pub fn remove_peer(&mut self, peer: &NodeId) {
        self.peer_frontiers.remove(peer);
        self.recompute_stable_frontier();
    }

    pub fn tracked_peers(&self) -> impl Iterator<Item = &NodeId> {
        self.peer_frontiers.keys()
    }

    pub fn peer_count(&self) -> usize {
        self.peer_frontiers.len()
    }

    pub fn peer_frontier(&self, peer: &NodeId) -> Option<&VectorClock> {
        self.peer_frontiers.get(peer)
    }

    pub fn local_frontier(&self) -> &VectorClock {
        &self.local_frontier
    }

    pub fn stable_frontier(&self) -> &VectorClock {
        &self.stable_frontier
    }

    /// Whether update number `sequence` from `origin` reached every node.
    pub fn is_stable(&self, origin: &NodeId, sequence: u64) -> bool {
        self.stable_frontier.contains(origin, sequence)
    }

    pub fn stability_state(&self, origin: &NodeId, sequence: u64) -> StabilityState {
        if self.is_stable(origin, sequence) {
            return StabilityState::Stable;
        }

        let mut delivered_to = BTreeSet::new();
        let mut pending_for = BTreeSet::new();

        let frontiers = std::iter::once((&self.node_id, &self.local_frontier))
            .chain(self.peer_frontiers.iter());
        for (node, frontier) in frontiers {
            if frontier.contains(origin, sequence) {
                delivered_to.insert(node.clone());
            } else {
                pending_for.insert(node.clone());
            }
        }

        if delivered_to.is_empty() {
            StabilityState::Pending
        } else {
            StabilityState::Partial {
                delivered_to,
                pending_for,
            }
        }
    }

    fn recompute_stable_frontier(&mut self) {
        let mut stable = self.local_frontier.clone();
        for frontier in self.peer_frontiers.values() {
            stable = stable.min_with(frontier);
        }
        if stable != self.stable_frontier {
            debug!(node = %self.node_id, stable = %stable, "stable frontier advanced");
        }
        self.stable_frontier = stable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: &str) -> NodeId {
        NodeId::from(id)
    }

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_entries(entries.iter().map(|(id, c)| (n(id), *c)))
    }

    #[test]
    fn test_alone_everything_local_is_stable() {
        let mut monitor = StabilityMonitor::new(n("a"));
        monitor.update_local_frontier(clock(&[("a", 3)]));
        assert!(monitor.is_stable(&n("a"), 3));
        assert!(!monitor.is_stable(&n("a"), 4));
    }

    #[test]
    fn test_silent_peer_holds_frontier() {
        let mut monitor = StabilityMonitor::new(n("a"));
        monitor.register_peer(n("b"));
        monitor.update_local_frontier(clock(&[("a", 3)]));
        assert!(!monitor.is_stable(&n("a"), 1));

        monitor.update_peer_frontier(n("b"), &clock(&[("a", 2)]));
        assert!(monitor.is_stable(&n("a"), 2));
        assert!(!monitor.is_stable(&n("a"), 3));
    }

    #[test]
    fn test_stale_announcement_does_not_regress() {
        let mut monitor = StabilityMonitor::new(n("a"));
        monitor.update_local_frontier(clock(&[("a", 5)]));
        monitor.update_peer_frontier(n("b"), &clock(&[("a", 4)]));
        monitor.update_peer_frontier(n("b"), &clock(&[("a", 1)]));
        assert!(monitor.is_stable(&n("a"), 4));
    }

    #[test]
    fn test_partial_state_lists_nodes() {
        let mut monitor = StabilityMonitor::new(n("a"));
        monitor.update_local_frontier(clock(&[("a", 10)]));
        monitor.update_peer_frontier(n("b"), &clock(&[("a", 5)]));

        assert_eq!(monitor.stability_state(&n("a"), 3), StabilityState::Stable);
        match monitor.stability_state(&n("a"), 7) {
            StabilityState::Partial {
                delivered_to,
                pending_for,
            } => {
                assert!(delivered_to.contains(&n("a")));
                assert!(pending_for.contains(&n("b")));
            }
            other => panic!("expected partial, got {:?}", other),
        }
        assert_eq!(monitor.stability_state(&n("a"), 11), StabilityState::Pending);
    }
}
