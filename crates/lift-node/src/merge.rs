//! Algebraic merger - folds versioned updates into replica state.
//!
//! The merge rule is picked per operation from its signature:
//!
//! - **Semilattice** operations join (take-maximum, set union). Replaying an
//!   update is harmless because the join is idempotent.
//! - **Abelian** operations add their delta. Addition is not idempotent, so
//!   every key remembers which update ids already contributed a delta and a
//!   redelivered update is dropped.
//!
//! Both rules are commutative and associative, so any delivery order of the
//! same set of updates produces the same state.
//!
//! Each key keeps one component per payload shape. Register overwrites only
//! arrive through consensus decisions and never share a component with a
//! liftable effect.

use crate::digest::{DigestWriter, StateDigest};
use crate::update::{UpdateId, VersionedUpdate};
use lift_core::lattice::Lattice;
use lift_core::max::Max;
use lift_core::operation::{Key, Operation, Payload};
use lift_core::set_union::SetUnion;
use lift_core::signature::{Classifier, Signature};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Whether redelivered Abelian deltas are detected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplyMode {
    /// Apply each update's deltas at most once per key.
    #[default]
    Deduplicated,
    /// Skip the applied-id check. Redelivery double counts; this mode only
    /// exists to show that the bookkeeping is load-bearing.
    Unchecked,
}

/// State of a single key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    counter: Option<i64>,
    maximum: Max<i64>,
    members: SetUnion<String>,
    register: Option<String>,
    /// Updates whose deltas were already added to this key.
    applied: BTreeSet<UpdateId>,
}

impl KeyState {
    pub fn counter(&self) -> Option<i64> {
        self.counter
    }

    pub fn maximum(&self) -> Option<i64> {
        self.maximum.get()
    }

    pub fn members(&self) -> &SetUnion<String> {
        &self.members
    }

    pub fn register(&self) -> Option<&str> {
        self.register.as_deref()
    }

    pub fn applied_updates(&self) -> &BTreeSet<UpdateId> {
        &self.applied
    }

    fn apply_payload(&mut self, payload: &Payload) {
        match payload {
            Payload::Delta(delta) => {
                let current = self.counter.unwrap_or(0);
                self.counter = Some(current.wrapping_add(*delta));
            }
            Payload::Max(value) => {
                self.maximum.join_assign(&Max::new(*value));
            }
            Payload::Insert(member) => {
                self.members.insert(member.clone());
            }
            Payload::Assign(value) => {
                self.register = Some(value.clone());
            }
        }
    }

    fn write_digest(&self, w: &mut DigestWriter) {
        if let Some(counter) = self.counter {
            w.tag(1);
            w.i64(counter);
        }
        if let Some(maximum) = self.maximum.get() {
            w.tag(2);
            w.i64(maximum);
        }
        w.tag(3);
        w.i64(self.members.len() as i64);
        for member in self.members.iter() {
            w.str(member);
        }
        if let Some(register) = &self.register {
            w.tag(4);
            w.str(register);
        }
        w.tag(5);
        w.i64(self.applied.len() as i64);
        for id in &self.applied {
            w.bytes(id.as_bytes());
        }
    }
}

/// Counts describing what a merge did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Abelian (or stray Generic) operations whose effect was added.
    pub applied: usize,
    /// Semilattice operations joined into the state. A join carries no
    /// update id, so a replayed join lands here too.
    pub joined: usize,
    /// Abelian operations dropped because the update was seen before.
    pub deduplicated: usize,
    /// Generic operations found inside a gossiped update.
    pub unexpected_generic: usize,
}

impl MergeReport {
    /// True when no operation with a tracked id took effect and at least
    /// one was suppressed. Joins are ignored: they are idempotent either way.
    pub fn is_redelivery(&self) -> bool {
        self.applied == 0 && self.deduplicated > 0
    }

    fn absorb(&mut self, other: MergeReport) {
        self.applied += other.applied;
        self.joined += other.joined;
        self.deduplicated += other.deduplicated;
        self.unexpected_generic += other.unexpected_generic;
    }
}

/// Converged per-key state of a replica.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaState {
    keys: BTreeMap<Key, KeyState>,
}

impl ReplicaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Key) -> Option<&KeyState> {
        self.keys.get(key)
    }

    pub fn counter(&self, key: &Key) -> Option<i64> {
        self.get(key).and_then(KeyState::counter)
    }

    pub fn maximum(&self, key: &Key) -> Option<i64> {
        self.get(key).and_then(KeyState::maximum)
    }

    pub fn register(&self, key: &Key) -> Option<&str> {
        self.get(key).and_then(KeyState::register)
    }

    pub fn contains_member(&self, key: &Key, member: &str) -> bool {
        self.get(key)
            .map(|state| state.members.contains(&member.to_string()))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &KeyState)> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Canonical digest of the full state, applied-id sets included.
    pub fn digest(&self) -> StateDigest {
        let mut w = DigestWriter::new();
        w.i64(self.keys.len() as i64);
        for (key, state) in &self.keys {
            w.tag(0);
            w.str(key.as_str());
            state.write_digest(&mut w);
        }
        w.finish()
    }

    /// Fold one versioned update into the state.
    pub fn apply_update(
        &mut self,
        update: &VersionedUpdate,
        classifier: &Classifier,
        mode: ApplyMode,
    ) -> MergeReport {
        let id = update.id();
        let mut report = MergeReport::default();
        let mut counted = BTreeSet::new();

        for op in update.operations() {
            let signature = classifier.classify_operation(op);
            let entry = self.keys.entry(op.key.clone()).or_default();

            if signature == Signature::Semilattice {
                entry.apply_payload(&op.payload);
                report.joined += 1;
                continue;
            }

            if signature == Signature::Generic {
                // Only reachable when the sender's kind table disagrees with ours.
                warn!(
                    update = %id,
                    origin = %update.origin(),
                    op = %op,
                    "generic operation inside a gossiped update, applying once"
                );
                report.unexpected_generic += 1;
            }

            if mode == ApplyMode::Deduplicated && entry.applied.contains(&id) {
                report.deduplicated += 1;
                continue;
            }

            entry.apply_payload(&op.payload);
            counted.insert(op.key.clone());
            report.applied += 1;
        }

        for key in counted {
            if let Some(entry) = self.keys.get_mut(&key) {
                entry.applied.insert(id);
            }
        }

        if report.deduplicated > 0 {
            debug!(
                update = %id,
                dropped = report.deduplicated,
                "duplicate delivery detected"
            );
        }

        report
    }

    /// Apply operations from a consensus decision, in the decided order.
    ///
    /// Exactly-once delivery is enforced by the caller's decision log.
    pub(crate) fn apply_decided(&mut self, operations: &[Operation]) {
        for op in operations {
            self.keys
                .entry(op.key.clone())
                .or_default()
                .apply_payload(&op.payload);
        }
    }
}

/// Stateless merge driver bound to a classification table.
#[derive(Clone, Copy, Debug)]
pub struct Merger<'a> {
    classifier: &'a Classifier,
    mode: ApplyMode,
}

impl<'a> Merger<'a> {
    pub fn new(classifier: &'a Classifier) -> Self {
        Self {
            classifier,
            mode: ApplyMode::Deduplicated,
        }
    }

    pub fn with_mode(classifier: &'a Classifier, mode: ApplyMode) -> Self {
        Self { classifier, mode }
    }

    pub fn mode(&self) -> ApplyMode {
        self.mode
    }

    /// Fold `update` into `state`.
    pub fn apply(&self, state: &mut ReplicaState, update: &VersionedUpdate) -> MergeReport {
        state.apply_update(update, self.classifier, self.mode)
    }

    /// State produced by merging two updates from scratch.
    pub fn merge(&self, a: &VersionedUpdate, b: &VersionedUpdate) -> ReplicaState {
        self.merge_all([a, b])
    }

    /// State produced by merging a stream of updates from scratch.
    pub fn merge_all<'u, I>(&self, updates: I) -> ReplicaState
    where
        I: IntoIterator<Item = &'u VersionedUpdate>,
    {
        let mut state = ReplicaState::new();
        self.merge_into(&mut state, updates);
        state
    }

    /// Fold a stream of updates into an existing state.
    pub fn merge_into<'u, I>(&self, state: &mut ReplicaState, updates: I) -> MergeReport
    where
        I: IntoIterator<Item = &'u VersionedUpdate>,
    {
        let mut total = MergeReport::default();
        for update in updates {
            total.absorb(self.apply(state, update));
        }
        total
    }
}

/// `merge(a, b)` with deduplication.
pub fn merge(a: &VersionedUpdate, b: &VersionedUpdate, classifier: &Classifier) -> ReplicaState {
    Merger::new(classifier).merge(a, b)
}

/// `merge_all(updates)` with deduplication.
pub fn merge_all<'u, I>(updates: I, classifier: &Classifier) -> ReplicaState
where
    I: IntoIterator<Item = &'u VersionedUpdate>,
{
    Merger::new(classifier).merge_all(updates)
}
