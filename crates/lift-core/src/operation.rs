//! Operations, payloads and transactions.
//!
//! An [`Operation`] names a target key, an operation kind and a payload.
//! The kind decides the algebraic signature (see [`crate::signature`]); the
//! payload decides which component of the key's state the operation touches.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Unique identifier of a node in the cluster.
    NodeId
);

string_id!(
    /// Key addressed by an operation.
    Key
);

string_id!(
    /// Name of an operation kind, e.g. `increment` or `overwrite`.
    OpKind
);

/// The component of a key's state an operation writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Additive counter
    Counter,
    /// Take-maximum register
    Maximum,
    /// Grow-only member set
    Set,
    /// Overwritable register
    Register,
}

/// Operation argument.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Signed delta added to a counter (wrapping arithmetic).
    Delta(i64),
    /// Candidate for a take-maximum register.
    Max(i64),
    /// Member inserted into a set.
    Insert(String),
    /// Value that unconditionally replaces a register.
    Assign(String),
}

impl Payload {
    pub fn shape(&self) -> Shape {
        match self {
            Payload::Delta(_) => Shape::Counter,
            Payload::Max(_) => Shape::Maximum,
            Payload::Insert(_) => Shape::Set,
            Payload::Assign(_) => Shape::Register,
        }
    }
}

/// A single state change addressed at one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub key: Key,
    pub kind: OpKind,
    pub payload: Payload,
}

impl Operation {
    pub fn new(key: impl Into<Key>, kind: impl Into<OpKind>, payload: Payload) -> Self {
        Self {
            key: key.into(),
            kind: kind.into(),
            payload,
        }
    }

    /// `increment(key, delta)` from the standard kind table.
    pub fn increment(key: impl Into<Key>, delta: i64) -> Self {
        Self::new(key, "increment", Payload::Delta(delta))
    }

    /// `decrement(key, amount)`; carried as a negated delta.
    pub fn decrement(key: impl Into<Key>, amount: i64) -> Self {
        Self::new(key, "decrement", Payload::Delta(amount.wrapping_neg()))
    }

    /// `max(key, value)` from the standard kind table.
    pub fn max(key: impl Into<Key>, value: i64) -> Self {
        Self::new(key, "max", Payload::Max(value))
    }

    /// `insert(key, member)` from the standard kind table.
    pub fn insert(key: impl Into<Key>, member: impl Into<String>) -> Self {
        Self::new(key, "insert", Payload::Insert(member.into()))
    }

    /// `overwrite(key, value)` from the standard kind table.
    pub fn overwrite(key: impl Into<Key>, value: impl Into<String>) -> Self {
        Self::new(key, "overwrite", Payload::Assign(value.into()))
    }

    pub fn shape(&self) -> Shape {
        self.payload.shape()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Delta(d) => write!(f, "{}({}, {:+})", self.kind, self.key, d),
            Payload::Max(v) => write!(f, "{}({}, {})", self.kind, self.key, v),
            Payload::Insert(m) | Payload::Assign(m) => {
                write!(f, "{}({}, {:?})", self.kind, self.key, m)
            }
        }
    }
}

/// An ordered list of operations submitted together.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transaction {
    operations: Vec<Operation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl From<Vec<Operation>> for Transaction {
    fn from(operations: Vec<Operation>) -> Self {
        Self { operations }
    }
}

impl FromIterator<Operation> for Transaction {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrement_negates_delta() {
        let op = Operation::decrement("stock", 3);
        assert_eq!(op.payload, Payload::Delta(-3));
        assert_eq!(op.kind.as_str(), "decrement");
    }

    #[test]
    fn test_payload_serializes_with_shape_tag() {
        let json = serde_json::to_string(&Payload::Delta(4)).unwrap();
        assert_eq!(json, r#"{"shape":"delta","value":4}"#);
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::increment("c", 2).to_string(), "increment(c, +2)");
        assert_eq!(
            Operation::overwrite("k", "A").to_string(),
            "overwrite(k, \"A\")"
        );
    }

    #[test]
    fn test_transaction_builder_keeps_order() {
        let tx = Transaction::new()
            .with(Operation::increment("a", 1))
            .with(Operation::max("b", 3));
        assert_eq!(tx.len(), 2);
        assert_eq!(tx.operations()[1].key, Key::from("b"));
    }
}
