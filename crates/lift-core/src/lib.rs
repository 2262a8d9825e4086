//! # lift-core
//!
//! Leaf types of the Lift coordination engine:
//!
//! - [`lattice`]: the join-semilattice trait and the lattices backing
//!   liftable operations ([`set_union`], [`max`])
//! - [`operation`]: node ids, keys, payloads, operations and transactions
//! - [`signature`]: algebraic signatures and the operation classifier
//! - [`vector_clock`]: causality tracking across nodes

pub mod error;
pub mod lattice;
pub mod max;
pub mod operation;
pub mod set_union;
pub mod signature;
pub mod vector_clock;

pub use error::ClassifierError;
pub use lattice::Lattice;
pub use max::Max;
pub use operation::{Key, NodeId, OpKind, Operation, Payload, Shape, Transaction};
pub use set_union::SetUnion;
pub use signature::{ClassifiedOperation, Classifier, KindSpec, Signature};
pub use vector_clock::{CausalOrder, VectorClock};
