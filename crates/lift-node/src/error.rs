//! Error types for the node layer.
//!
//! Liftable commits never fail, so every variant here concerns the
//! coordinated path, registration, or the wire format.

use crate::consensus::ProposalId;
use lift_core::error::ClassifierError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Consensus unavailable for proposal {proposal}: gave up after {attempts} attempts and {redirects} redirects")]
    Unavailable {
        proposal: ProposalId,
        attempts: u32,
        redirects: u32,
    },

    #[error("Unknown proposal: {0}")]
    UnknownProposal(ProposalId),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
