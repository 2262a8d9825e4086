//! Vector clock for causality tracking without a shared clock.
//!
//! Each node owns one dimension and only ever increments that entry; merging
//! takes the pointwise maximum. Dimensions are created lazily: an entry that
//! is absent reads as 0, so `{a: 0}` and `{}` are the same clock.

use crate::lattice::Lattice;
use crate::operation::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Result of comparing two clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CausalOrder {
    /// Every entry ≤ the other's and at least one is strictly smaller.
    Before,
    /// Mirror of `Before`.
    After,
    /// Neither dominates.
    Concurrent,
    Equal,
}

/// Per-node counter vector.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (NodeId, u64)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Counter for a node; unknown nodes read as 0.
    pub fn get(&self, node: &NodeId) -> u64 {
        self.entries.get(node).copied().unwrap_or(0)
    }

    /// Increment this node's own entry and return a snapshot of the clock.
    pub fn tick(&mut self, self_id: &NodeId) -> VectorClock {
        let entry = self.entries.entry(self_id.clone()).or_insert(0);
        *entry += 1;
        self.clone()
    }

    /// Add a zero entry for a node that just joined. Existing entries are kept.
    pub fn observe(&mut self, node: &NodeId) {
        self.entries.entry(node.clone()).or_insert(0);
    }

    /// Pointwise maximum, introducing entries for nodes not seen before.
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &counter) in &other.entries {
            let current = self.entries.entry(node.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Merged copy without modifying self.
    pub fn merged_with(&self, other: &VectorClock) -> VectorClock {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Pointwise minimum. Entries that end up 0 are dropped.
    pub fn min_with(&self, other: &VectorClock) -> VectorClock {
        let mut result = VectorClock::new();
        for node in self.nodes_with(other) {
            let min = self.get(node).min(other.get(node));
            if min > 0 {
                result.entries.insert(node.clone(), min);
            }
        }
        result
    }

    /// Compare two clocks with the dominance rule.
    pub fn compare(&self, other: &VectorClock) -> CausalOrder {
        let mut less = false;
        let mut greater = false;

        for node in self.nodes_with(other) {
            let (a, b) = (self.get(node), other.get(node));
            if a < b {
                less = true;
            } else if a > b {
                greater = true;
            }
            if less && greater {
                return CausalOrder::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    /// True if every entry of `other` is ≤ the matching entry here.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(
            self.compare(other),
            CausalOrder::After | CausalOrder::Equal
        )
    }

    pub fn happened_before(&self, other: &VectorClock) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// Check if event number `sequence` of `node` is covered by this clock.
    pub fn contains(&self, node: &NodeId, sequence: u64) -> bool {
        self.get(node) >= sequence
    }

    /// Raise a single entry; lower values are ignored.
    pub fn advance(&mut self, node: &NodeId, counter: u64) {
        let entry = self.entries.entry(node.clone()).or_insert(0);
        *entry = (*entry).max(counter);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &u64)> {
        self.entries.iter()
    }

    /// Nodes with an entry, including zero entries added by `observe`.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counters (number of events covered).
    pub fn total_events(&self) -> u64 {
        self.entries.values().sum()
    }

    fn nodes_with<'a>(&'a self, other: &'a VectorClock) -> BTreeSet<&'a NodeId> {
        self.entries.keys().chain(other.entries.keys()).collect()
    }
}

/// Free-function form of [`VectorClock::compare`].
pub fn compare(a: &VectorClock, b: &VectorClock) -> CausalOrder {
    a.compare(b)
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Equal
    }
}

impl Eq for VectorClock {}

impl Lattice for VectorClock {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        self.merged_with(other)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (node, counter)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", node, counter)?;
        }
        f.write_str("}")
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
    fn test_tick_increments_only_own_entry() {
        let mut vc = clock(&[("b", 4)]);
        let snapshot = vc.tick(&n("a"));
        assert_eq!(snapshot.get(&n("a")), 1);
        assert_eq!(snapshot.get(&n("b")), 4);
        vc.tick(&n("a"));
        assert_eq!(vc.get(&n("a")), 2);
        assert_eq!(snapshot.get(&n("a")), 1);
    }

    #[test]
    fn test_merge_takes_pointwise_max_and_adds_unknown_nodes() {
        let mut a = clock(&[("a", 5), ("b", 3)]);
        a.merge(&clock(&[("a", 3), ("b", 7), ("c", 1)]));
        assert_eq!(a.get(&n("a")), 5);
        assert_eq!(a.get(&n("b")), 7);
        assert_eq!(a.get(&n("c")), 1);
    }

    #[test]
    fn test_compare_dominance_rule() {
        let a = clock(&[("a", 1)]);
        let b = clock(&[("a", 1), ("b", 1)]);
        let c = clock(&[("b", 2)]);

        assert_eq!(a.compare(&b), CausalOrder::Before);
        assert_eq!(b.compare(&a), CausalOrder::After);
        assert_eq!(a.compare(&c), CausalOrder::Concurrent);
        assert_eq!(b.compare(&b.clone()), CausalOrder::Equal);
    }

    #[test]
    fn test_absent_entries_read_as_zero() {
        let mut joined = VectorClock::new();
        joined.observe(&n("newcomer"));
        assert_eq!(joined.len(), 1);
        assert_eq!(joined, VectorClock::new());
        assert_eq!(joined.compare(&VectorClock::new()), CausalOrder::Equal);

        let other = clock(&[("newcomer", 2)]);
        assert!(joined.happened_before(&other));
    }

    #[test]
    fn test_observe_does_not_reset_counters() {
        let mut vc = clock(&[("a", 3)]);
        vc.observe(&n("a"));
        assert_eq!(vc.get(&n("a")), 3);
    }

    #[test]
    fn test_min_with_drops_zero_entries() {
        let a = clock(&[("a", 5), ("b", 3)]);
        let b = clock(&[("a", 2), ("c", 9)]);
        let min = a.min_with(&b);
        assert_eq!(min.get(&n("a")), 2);
        assert_eq!(min.len(), 1);
    }

    #[test]
    fn test_contains_sequence() {
        let vc = clock(&[("a", 5)]);
        assert!(vc.contains(&n("a"), 5));
        assert!(!vc.contains(&n("a"), 6));
        assert!(!vc.contains(&n("b"), 1));
    }

    #[test]
    fn test_serializes_as_map() {
        let vc = clock(&[("a", 1), ("b", 2)]);
        let json = serde_json::to_string(&vc).unwrap();
        assert_eq!(json, r#"{"a":1,"b":2}"#);
        let back: VectorClock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vc);
    }

    #[test]
    fn test_display_lists_entries() {
        assert_eq!(clock(&[("a", 1), ("b", 2)]).to_string(), "{a: 1, b: 2}");
    }
}
