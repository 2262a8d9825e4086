//! Decomposition of a transaction into a liftable and a coordinated part.
//!
//! Operations on the same key are checked pairwise, within the transaction
//! and against the operations of transactions this node proposed to
//! consensus that have not resolved yet:
//!
//! | pair                         | verdict         |
//! |------------------------------|-----------------|
//! | different keys               | both liftable   |
//! | Semilattice / Semilattice    | both liftable   |
//! | Abelian / Abelian            | both liftable   |
//! | either Generic               | both coordinate |
//! | Semilattice / Abelian        | both coordinate |
//!
//! Escalation is a routing decision, not an error: the coordinated part goes
//! to consensus while the liftable part commits immediately.
//!
//! The only way to obtain a [`LiftableSet`] is through [`Decomposer`], so the
//! local commit path never sees an operation that was not classified.

use crate::consensus::ProposalId;
use lift_core::operation::{Key, Operation, Transaction};
use lift_core::signature::{ClassifiedOperation, Classifier, Signature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// How far a conflict spreads across the operations of a key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Any Generic operation on a key, in the transaction or pending,
    /// coordinates every operation on that key.
    #[default]
    KeyWide,
    /// A Generic operation is coordinated on its own. Algebraic operations
    /// coordinate only when they meet an algebraic operation with a
    /// different signature on the same key.
    ConflictingPairs,
}

/// Why an operation was routed to consensus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EscalationReason {
    /// The operation itself has no algebraic guarantee.
    Generic,
    /// Another operation on the key in this transaction has a different
    /// signature.
    MixedSignatures { with: Signature },
    /// A pending proposal holds a Generic operation on the key.
    PendingGeneric { proposal: ProposalId },
    /// A pending proposal holds an operation with a different signature.
    PendingConflict {
        proposal: ProposalId,
        with: Signature,
    },
}

/// One escalated operation and the reason it was escalated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Escalation {
    /// Position in the submitted transaction.
    pub index: usize,
    pub operation: Operation,
    pub reason: EscalationReason,
}

/// Operations that may commit locally without coordination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiftableSet {
    operations: Vec<ClassifiedOperation>,
}

impl LiftableSet {
    pub fn operations(&self) -> &[ClassifiedOperation] {
        &self.operations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().map(|c| &c.operation)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations.into_iter().map(|c| c.operation).collect()
    }
}

/// Operations that must be totally ordered by consensus.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatedSet {
    operations: Vec<ClassifiedOperation>,
}

impl CoordinatedSet {
    pub fn operations(&self) -> &[ClassifiedOperation] {
        &self.operations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().map(|c| &c.operation)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations.into_iter().map(|c| c.operation).collect()
    }
}

/// Result of decomposing one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decomposition {
    pub liftable: LiftableSet,
    pub coordinated: CoordinatedSet,
    pub escalations: Vec<Escalation>,
    total: usize,
}

impl Decomposition {
    /// `|liftable| / |transaction|`; an empty transaction is fully liftable.
    pub fn lifting_fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.liftable.len() as f64 / self.total as f64
        }
    }

    /// Number of operations in the decomposed transaction.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_fully_liftable(&self) -> bool {
        self.coordinated.is_empty()
    }
}

/// Signatures of operations in unresolved local proposals, by key.
#[derive(Clone, Debug, Default)]
pub struct PendingIndex {
    by_key: BTreeMap<Key, Vec<(ProposalId, Signature)>>,
}

impl PendingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the operations of a proposal until it resolves.
    pub fn add<'a>(
        &mut self,
        proposal: ProposalId,
        operations: impl IntoIterator<Item = &'a ClassifiedOperation>,
    ) {
        for classified in operations {
            self.by_key
                .entry(classified.operation.key.clone())
                .or_default()
                .push((proposal, classified.signature));
        }
    }

    pub fn on_key(&self, key: &Key) -> &[(ProposalId, Signature)] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    fn pending_generic(&self, key: &Key) -> Option<ProposalId> {
        self.on_key(key)
            .iter()
            .find(|(_, sig)| *sig == Signature::Generic)
            .map(|(id, _)| *id)
    }

    fn pending_algebraic_conflict(
        &self,
        key: &Key,
        signature: Signature,
    ) -> Option<(ProposalId, Signature)> {
        self.on_key(key)
            .iter()
            .find(|(_, other)| other.is_liftable() && !signature.commutes_with(*other))
            .copied()
    }
}

/// Splits transactions according to a classifier and an escalation policy.
#[derive(Clone, Copy, Debug)]
pub struct Decomposer<'a> {
    classifier: &'a Classifier,
    policy: EscalationPolicy,
}

impl<'a> Decomposer<'a> {
    pub fn new(classifier: &'a Classifier, policy: EscalationPolicy) -> Self {
        Self { classifier, policy }
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }

    pub fn decompose(&self, transaction: &Transaction, pending: &PendingIndex) -> Decomposition {
        let classified: Vec<ClassifiedOperation> = transaction
            .iter()
            .cloned()
            .map(|op| self.classifier.annotate(op))
            .collect();

        let mut by_key: BTreeMap<&Key, Vec<Signature>> = BTreeMap::new();
        for c in &classified {
            by_key.entry(&c.operation.key).or_default().push(c.signature);
        }

        let mut liftable = Vec::new();
        let mut coordinated = Vec::new();
        let mut escalations = Vec::new();

        for (index, c) in classified.iter().enumerate() {
            let same_key = by_key
                .get(&c.operation.key)
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            match self.escalation_reason(c, same_key, pending) {
                None => liftable.push(c.clone()),
                Some(reason) => {
                    debug!(
                        key = %c.operation.key,
                        op = %c.operation,
                        ?reason,
                        "escalating operation to consensus"
                    );
                    escalations.push(Escalation {
                        index,
                        operation: c.operation.clone(),
                        reason,
                    });
                    coordinated.push(c.clone());
                }
            }
        }

        Decomposition {
            liftable: LiftableSet {
                operations: liftable,
            },
            coordinated: CoordinatedSet {
                operations: coordinated,
            },
            escalations,
            total: classified.len(),
        }
    }

    fn escalation_reason(
        &self,
        op: &ClassifiedOperation,
        same_key: &[Signature],
        pending: &PendingIndex,
    ) -> Option<EscalationReason> {
        if op.signature == Signature::Generic {
            return Some(EscalationReason::Generic);
        }

        let key = &op.operation.key;
        match self.policy {
            EscalationPolicy::KeyWide => {
                if let Some(proposal) = pending.pending_generic(key) {
                    return Some(EscalationReason::PendingGeneric { proposal });
                }
                if let Some(with) = same_key.iter().find(|s| !op.signature.commutes_with(**s)) {
                    return Some(EscalationReason::MixedSignatures { with: *with });
                }
            }
            EscalationPolicy::ConflictingPairs => {
                if let Some(with) = same_key
                    .iter()
                    .find(|s| s.is_liftable() && !op.signature.commutes_with(**s))
                {
                    return Some(EscalationReason::MixedSignatures { with: *with });
                }
            }
        }

        pending
            .pending_algebraic_conflict(key, op.signature)
            .map(|(proposal, with)| EscalationReason::PendingConflict { proposal, with })
    }
}
