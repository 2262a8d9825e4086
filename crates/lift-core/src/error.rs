//! Error types for kind registration.

use crate::operation::{OpKind, Shape};
use crate::signature::Signature;
use thiserror::Error;

/// Errors raised while building the classification table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("kind {kind} cannot be declared {declared:?}: {shape:?} payloads are at most {natural:?}")]
    InadmissibleSignature {
        kind: OpKind,
        shape: Shape,
        declared: Signature,
        natural: Signature,
    },

    #[error("kind {kind} is already registered as {existing:?}/{existing_shape:?}, refusing {requested:?}/{requested_shape:?}")]
    ConflictingRegistration {
        kind: OpKind,
        existing: Signature,
        existing_shape: Shape,
        requested: Signature,
        requested_shape: Shape,
    },
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
