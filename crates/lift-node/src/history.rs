//! Causal history of versioned updates.
//!
//! Updates form a DAG ordered by their vector clocks: `a` precedes `b` iff
//! `a.clock < b.clock`. The history retains every update a node has
//! delivered until it becomes causally stable, and tracks the delivery
//! frontier used for stability decisions.

use crate::update::{UpdateId, VersionedUpdate};
use lift_core::operation::NodeId;
use lift_core::vector_clock::VectorClock;
use std::collections::{BTreeMap, BTreeSet};

/// Highest contiguous sequence delivered from each origin.
///
/// Updates can arrive out of order; a gap in an origin's sequence holds the
/// frontier back until it is filled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryFrontier {
    contiguous: VectorClock,
    out_of_order: BTreeMap<NodeId, BTreeSet<u64>>,
}

impl DeliveryFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record delivery of `origin`'s update number `sequence`.
    /// Returns false if it was already recorded.
    pub fn record(&mut self, origin: &NodeId, sequence: u64) -> bool {
        let current = self.contiguous.get(origin);
        if sequence <= current {
            return false;
        }
        if sequence != current + 1 {
            return self
                .out_of_order
                .entry(origin.clone())
                .or_default()
                .insert(sequence);
        }

        let mut next = sequence;
        if let Some(waiting) = self.out_of_order.get_mut(origin) {
            while waiting.remove(&(next + 1)) {
                next += 1;
            }
            if waiting.is_empty() {
                self.out_of_order.remove(origin);
            }
        }
        self.contiguous.advance(origin, next);
        true
    }

    pub fn has_delivered(&self, origin: &NodeId, sequence: u64) -> bool {
        self.contiguous.contains(origin, sequence)
            || self
                .out_of_order
                .get(origin)
                .map(|waiting| waiting.contains(&sequence))
                .unwrap_or(false)
    }

    pub fn contiguous(&self) -> &VectorClock {
        &self.contiguous
    }

    /// Updates delivered ahead of a gap.
    pub fn gap_count(&self) -> usize {
        self.out_of_order.values().map(BTreeSet::len).sum()
    }
}

/// Retained updates plus the delivery frontier.
#[derive(Clone, Debug, Default)]
pub struct CausalHistory {
    updates: BTreeMap<UpdateId, VersionedUpdate>,
    delivered: DeliveryFrontier,
    pruned: usize,
}

impl CausalHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain an update and record its delivery. Returns false if the update
    /// was already retained.
    pub fn insert(&mut self, update: VersionedUpdate) -> bool {
        self.delivered.record(update.origin(), update.sequence());
        if self.updates.contains_key(&update.id()) {
            return false;
        }
        self.updates.insert(update.id(), update);
        true
    }

    pub fn contains(&self, id: &UpdateId) -> bool {
        self.updates.contains_key(id)
    }

    pub fn get(&self, id: &UpdateId) -> Option<&VersionedUpdate> {
        self.updates.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionedUpdate> {
        self.updates.values()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Total number of updates removed by [`prune_stable`](Self::prune_stable).
    pub fn pruned(&self) -> usize {
        self.pruned
    }

    pub fn delivered(&self) -> &DeliveryFrontier {
        &self.delivered
    }

    /// Retained updates with no retained causal successor.
    pub fn heads(&self) -> Vec<&VersionedUpdate> {
        self.updates
            .values()
            .filter(|candidate| {
                !self
                    .updates
                    .values()
                    .any(|other| candidate.clock().happened_before(other.clock()))
            })
            .collect()
    }

    /// Retained updates that causally precede `id`.
    pub fn predecessors(&self, id: &UpdateId) -> Vec<&VersionedUpdate> {
        let Some(target) = self.updates.get(id) else {
            return Vec::new();
        };
        self.updates
            .values()
            .filter(|u| u.clock().happened_before(target.clock()))
            .collect()
    }

    /// Retained updates concurrent with `id`.
    pub fn concurrent_with(&self, id: &UpdateId) -> Vec<&VersionedUpdate> {
        let Some(target) = self.updates.get(id) else {
            return Vec::new();
        };
        self.updates
            .values()
            .filter(|u| u.clock().is_concurrent_with(target.clock()))
            .collect()
    }

    /// A linear extension of the causal order.
    ///
    /// `a < b` implies `a` has strictly fewer events than `b`, so sorting by
    /// event count (ties broken by id) never places a successor first.
    pub fn causal_order(&self) -> Vec<&VersionedUpdate> {
        let mut ordered: Vec<&VersionedUpdate> = self.updates.values().collect();
        ordered.sort_by_key(|u| (u.clock().total_events(), u.id()));
        ordered
    }

    /// Drop every update covered by the stable frontier.
    pub fn prune_stable(&mut self, stable: &VectorClock) -> usize {
        let before = self.updates.len();
        self.updates
            .retain(|_, u| !stable.contains(u.origin(), u.sequence()));
        let removed = before - self.updates.len();
        self.pruned += removed;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lift_core::operation::Operation;

    fn node(n: &str) -> NodeId {
        NodeId::from(n)
    }

    fn update(id: u128, origin: &str, entries: &[(&str, u64)]) -> VersionedUpdate {
        VersionedUpdate::new(
            UpdateId::from_u128(id),
            node(origin),
            VectorClock::from_entries(entries.iter().map(|(n, c)| (node(n), *c))),
            vec![Operation::increment("k", 1)],
        )
    }

    #[test]
    fn test_frontier_waits_for_gaps() {
        let mut f = DeliveryFrontier::new();
        assert!(f.record(&node("a"), 2));
        assert_eq!(f.contiguous().get(&node("a")), 0);
        assert_eq!(f.gap_count(), 1);

        assert!(f.record(&node("a"), 1));
        assert_eq!(f.contiguous().get(&node("a")), 2);
        assert_eq!(f.gap_count(), 0);

        assert!(!f.record(&node("a"), 2));
        assert!(f.has_delivered(&node("a"), 1));
    }

    #[test]
    fn test_dag_queries() {
        let mut h = CausalHistory::new();
        let root = update(1, "a", &[("a", 1)]);
        let left = update(2, "a", &[("a", 2)]);
        let right = update(3, "b", &[("a", 1), ("b", 1)]);
        for u in [&right, &left, &root] {
            h.insert(u.clone());
        }

        let heads: Vec<UpdateId> = h.heads().iter().map(|u| u.id()).collect();
        assert_eq!(heads, vec![left.id(), right.id()]);

        assert_eq!(h.predecessors(&right.id()).len(), 1);
        assert_eq!(h.concurrent_with(&left.id())[0].id(), right.id());

        let order: Vec<UpdateId> = h.causal_order().iter().map(|u| u.id()).collect();
        assert_eq!(order[0], root.id());
    }

    #[test]
    fn test_prune_removes_only_stable() {
        let mut h = CausalHistory::new();
        h.insert(update(1, "a", &[("a", 1)]));
        h.insert(update(2, "a", &[("a", 2)]));

        let stable = VectorClock::from_entries([(node("a"), 1)]);
        assert_eq!(h.prune_stable(&stable), 1);
        assert!(!h.contains(&UpdateId::from_u128(1)));
        assert!(h.contains(&UpdateId::from_u128(2)));
        assert_eq!(h.pruned(), 1);
    }

    #[test]
    fn test_reinsert_is_ignored() {
        let mut h = CausalHistory::new();
        let u = update(1, "a", &[("a", 1)]);
        assert!(h.insert(u.clone()));
        assert!(!h.insert(u));
        assert_eq!(h.len(), 1);
    }
}
