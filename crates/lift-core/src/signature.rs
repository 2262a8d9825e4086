//! Algebraic signatures and the operation classifier.
//!
//! Every operation kind is registered once with the payload shape it writes
//! and the algebraic signature it guarantees:
//!
//! | Signature     | Laws                                          | Example        |
//! |---------------|-----------------------------------------------|----------------|
//! | `Semilattice` | commutative, associative, idempotent          | max, set union |
//! | `Abelian`     | commutative, associative, identity, inverse   | additive delta |
//! | `Generic`     | none                                          | overwrite      |
//!
//! Classification is a pure function of the kind, so every node holding the
//! same table reaches the same verdict without talking to anyone. Unknown
//! kinds are classified `Generic`.

use crate::error::{ClassifierError, Result};
use crate::operation::{OpKind, Operation, Shape};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Algebraic guarantee an operation kind provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signature {
    Semilattice,
    Abelian,
    Generic,
}

impl Signature {
    /// Whether operations with this signature may commit without coordination.
    pub fn is_liftable(self) -> bool {
        !matches!(self, Signature::Generic)
    }

    /// Whether re-applying the operation leaves the state unchanged.
    pub fn is_idempotent(self) -> bool {
        matches!(self, Signature::Semilattice)
    }

    /// Whether two operations on the same key are guaranteed to commute.
    ///
    /// Only same-signature algebraic pairs qualify.
    pub fn commutes_with(self, other: Signature) -> bool {
        matches!(
            (self, other),
            (Signature::Semilattice, Signature::Semilattice)
                | (Signature::Abelian, Signature::Abelian)
        )
    }

    /// The strongest signature a payload shape can honestly claim.
    pub fn natural_for(shape: Shape) -> Signature {
        match shape {
            Shape::Counter => Signature::Abelian,
            Shape::Maximum | Shape::Set => Signature::Semilattice,
            Shape::Register => Signature::Generic,
        }
    }

    fn admissible_for(self, shape: Shape) -> bool {
        self == Signature::Generic || self == Signature::natural_for(shape)
    }
}

/// Registration entry for one operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSpec {
    pub shape: Shape,
    pub signature: Signature,
}

/// An operation paired with the signature the classifier assigned to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedOperation {
    pub operation: Operation,
    pub signature: Signature,
}

/// Fixed registration table from operation kind to signature.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classifier {
    table: BTreeMap<OpKind, KindSpec>,
}

impl Classifier {
    /// An empty table; every kind classifies as `Generic`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard kinds:
    /// `increment`/`decrement` (Abelian), `max`/`insert` (Semilattice),
    /// `overwrite` (Generic).
    pub fn standard() -> Self {
        let mut table = BTreeMap::new();
        let entries = [
            ("increment", Shape::Counter, Signature::Abelian),
            ("decrement", Shape::Counter, Signature::Abelian),
            ("max", Shape::Maximum, Signature::Semilattice),
            ("insert", Shape::Set, Signature::Semilattice),
            ("overwrite", Shape::Register, Signature::Generic),
        ];
        for (kind, shape, signature) in entries {
            table.insert(OpKind::from(kind), KindSpec { shape, signature });
        }
        Self { table }
    }

    /// Register a kind.
    ///
    /// The signature must be the shape's natural signature or `Generic`.
    /// Registering the same kind twice is only accepted when nothing changes.
    pub fn register(
        &mut self,
        kind: impl Into<OpKind>,
        shape: Shape,
        signature: Signature,
    ) -> Result<()> {
        let kind = kind.into();

        if !signature.admissible_for(shape) {
            return Err(ClassifierError::InadmissibleSignature {
                kind,
                shape,
                declared: signature,
                natural: Signature::natural_for(shape),
            });
        }

        let requested = KindSpec { shape, signature };
        match self.table.get(&kind) {
            Some(existing) if *existing == requested => Ok(()),
            Some(existing) => Err(ClassifierError::ConflictingRegistration {
                kind,
                existing: existing.signature,
                existing_shape: existing.shape,
                requested: signature,
                requested_shape: shape,
            }),
            None => {
                self.table.insert(kind, requested);
                Ok(())
            }
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(
        mut self,
        kind: impl Into<OpKind>,
        shape: Shape,
        signature: Signature,
    ) -> Result<Self> {
        self.register(kind, shape, signature)?;
        Ok(self)
    }

    /// Signature of a kind; unregistered kinds are `Generic`.
    pub fn classify(&self, kind: &OpKind) -> Signature {
        self.table
            .get(kind)
            .map(|spec| spec.signature)
            .unwrap_or(Signature::Generic)
    }

    /// Classify a concrete operation.
    ///
    /// Falls back to `Generic` when the kind is unknown or when the payload
    /// writes a different component than the kind was registered for.
    pub fn classify_operation(&self, operation: &Operation) -> Signature {
        match self.table.get(&operation.kind) {
            Some(spec) if spec.shape == operation.shape() => spec.signature,
            Some(spec) => {
                warn!(
                    kind = %operation.kind,
                    key = %operation.key,
                    registered = ?spec.shape,
                    found = ?operation.shape(),
                    "payload shape disagrees with registered kind, treating as generic"
                );
                Signature::Generic
            }
            None => {
                warn!(
                    kind = %operation.kind,
                    key = %operation.key,
                    "unclassifiable operation kind, treating as generic"
                );
                Signature::Generic
            }
        }
    }

    /// Pair an operation with its signature.
    pub fn annotate(&self, operation: Operation) -> ClassifiedOperation {
        let signature = self.classify_operation(&operation);
        ClassifiedOperation {
            operation,
            signature,
        }
    }

    pub fn lookup(&self, kind: &OpKind) -> Option<&KindSpec> {
        self.table.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = (&OpKind, &KindSpec)> {
        self.table.iter()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Payload;

    #[test]
    fn test_standard_table_signatures() {
        let c = Classifier::standard();
        assert_eq!(c.classify(&"increment".into()), Signature::Abelian);
        assert_eq!(c.classify(&"max".into()), Signature::Semilattice);
        assert_eq!(c.classify(&"insert".into()), Signature::Semilattice);
        assert_eq!(c.classify(&"overwrite".into()), Signature::Generic);
    }

    #[test]
    fn test_unregistered_kind_is_generic() {
        let c = Classifier::standard();
        assert_eq!(c.classify(&"frobnicate".into()), Signature::Generic);
        let op = Operation::new("k", "frobnicate", Payload::Max(1));
        assert_eq!(c.classify_operation(&op), Signature::Generic);
    }

    #[test]
    fn test_rejects_overclaimed_signature() {
        let mut c = Classifier::new();
        let err = c
            .register("sum", Shape::Counter, Signature::Semilattice)
            .unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::InadmissibleSignature {
                natural: Signature::Abelian,
                ..
            }
        ));
        assert!(c
            .register("assign", Shape::Register, Signature::Abelian)
            .is_err());
    }

    #[test]
    fn test_generic_is_always_admissible() {
        let c = Classifier::new()
            .with("strict_add", Shape::Counter, Signature::Generic)
            .unwrap();
        assert_eq!(c.classify(&"strict_add".into()), Signature::Generic);
    }

    #[test]
    fn test_signature_is_fixed_for_kind_lifetime() {
        let mut c = Classifier::standard();
        assert!(c
            .register("increment", Shape::Counter, Signature::Abelian)
            .is_ok());
        let err = c
            .register("increment", Shape::Counter, Signature::Generic)
            .unwrap_err();
        assert!(matches!(err, ClassifierError::ConflictingRegistration { .. }));
        assert_eq!(c.classify(&"increment".into()), Signature::Abelian);
    }

    #[test]
    fn test_shape_mismatch_degrades_to_generic() {
        let c = Classifier::standard();
        let op = Operation::new("k", "increment", Payload::Assign("x".into()));
        assert_eq!(c.classify_operation(&op), Signature::Generic);
    }

    #[test]
    fn test_commutation_table() {
        use Signature::*;
        assert!(Semilattice.commutes_with(Semilattice));
        assert!(Abelian.commutes_with(Abelian));
        assert!(!Semilattice.commutes_with(Abelian));
        assert!(!Generic.commutes_with(Generic));
        assert!(!Abelian.commutes_with(Generic));
    }
}
