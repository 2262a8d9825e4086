//! Versioned updates - the immutable unit of gossip.
//!
//! A [`VersionedUpdate`] is created exactly once, when a node commits the
//! liftable part of a transaction, and is never mutated afterwards. Its
//! serialized form is the gossip wire message:
//!
//! ```text
//! { "update_id": UUID, "origin_node": NodeId,
//!   "vector_clock": { NodeId: u64 }, "operations": [Operation] }
//! ```

use lift_core::operation::{NodeId, Operation};
use lift_core::vector_clock::VectorClock;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique id of a versioned update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateId(Uuid);

impl UpdateId {
    /// A fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Deterministic id, handy for reproducible simulations.
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable record of operations a node applied locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedUpdate {
    update_id: UpdateId,
    origin_node: NodeId,
    vector_clock: VectorClock,
    operations: Vec<Operation>,
}

impl VersionedUpdate {
    pub fn new(
        update_id: UpdateId,
        origin_node: NodeId,
        vector_clock: VectorClock,
        operations: Vec<Operation>,
    ) -> Self {
        Self {
            update_id,
            origin_node,
            vector_clock,
            operations,
        }
    }

    pub fn id(&self) -> UpdateId {
        self.update_id
    }

    pub fn origin(&self) -> &NodeId {
        &self.origin_node
    }

    pub fn clock(&self) -> &VectorClock {
        &self.vector_clock
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Position of this update in its origin's sequence.
    ///
    /// The origin ticks once per update, so its own clock entry numbers
    /// its updates 1, 2, 3, ...
    pub fn sequence(&self) -> u64 {
        self.vector_clock.get(&self.origin_node)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
