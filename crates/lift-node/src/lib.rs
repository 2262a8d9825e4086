//! # lift-node
//!
//! A single Lift node. Each submitted transaction is split by the
//! [`decompose`] engine: the liftable part commits locally at once
//! ([`commit`]) and travels to peers as a [`VersionedUpdate`]; the rest is
//! proposed to an external consensus service ([`consensus`]) and applied in
//! the decided total order.
//!
//! Received updates are folded in by the algebraic [`merge`] rules, which
//! tolerate reordering and duplication. Retained history is collected once
//! the [`stability`] monitor sees it delivered everywhere.

pub mod commit;
pub mod config;
pub mod consensus;
pub mod decompose;
pub mod digest;
pub mod error;
pub mod history;
pub mod merge;
pub mod message;
pub mod node;
pub mod stability;
pub mod update;

pub use commit::{Delivery, LocalReplica};
pub use config::{NodeConfig, NodeConfigBuilder};
pub use consensus::{
    ConsensusCoordinator, Decision, DecisionLog, DecisionStatus, Proposal, ProposalDriver,
    ProposalId, ProposalOutcome, RetryConfig,
};
pub use decompose::{
    CoordinatedSet, Decomposer, Decomposition, Escalation, EscalationPolicy, EscalationReason,
    LiftableSet, PendingIndex,
};
pub use digest::StateDigest;
pub use error::{NodeError, Result};
pub use history::{CausalHistory, DeliveryFrontier};
pub use merge::{merge, merge_all, ApplyMode, KeyState, MergeReport, Merger, ReplicaState};
pub use message::GossipMessage;
pub use node::{CommitResult, CommitScope, Node, ReceiveOutcome, SubmitAck, Submission};
pub use stability::{StabilityMonitor, StabilityState};
pub use update::{UpdateId, VersionedUpdate};
