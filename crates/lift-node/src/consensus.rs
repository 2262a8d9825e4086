//! Consensus contract and the proposal driver.
//!
//! The consensus algorithm itself is external. Lift only relies on the
//! contract below: a proposal is eventually `Decided` with a slot in a
//! single total order, or the attempt ends with `Timeout` or `NotLeader`.
//!
//! [`ProposalDriver`] turns that contract into a single `Result`: timeouts
//! are retried with bounded exponential backoff, leader hints are followed,
//! and exhaustion surfaces as [`NodeError::Unavailable`].
//! [`DecisionLog`] makes decision delivery exactly-once and in slot order,
//! by slot and by proposal id.

use crate::error::{NodeError, Result};
use async_trait::async_trait;
use lift_core::operation::{NodeId, Operation};
use lift_core::vector_clock::VectorClock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Id of a coordinated proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(Uuid);

impl ProposalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The coordinated part of a transaction, as handed to consensus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub origin: NodeId,
    pub operations: Vec<Operation>,
    /// Origin's clock when the proposal was made.
    pub clock: VectorClock,
}

/// A proposal placed at a slot of the total order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub slot: u64,
    pub proposal: Proposal,
}

/// Result of one proposal attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProposalOutcome {
    Decided(Decision),
    Timeout,
    NotLeader { leader: Option<NodeId> },
}

/// External agreement protocol.
#[async_trait]
pub trait ConsensusCoordinator: Send + Sync {
    /// Submit `proposal` through node `via`.
    ///
    /// Re-proposing a decided id should return the original decision. If it
    /// is sequenced again instead, [`DecisionLog`] skips the second slot.
    async fn propose(&self, via: &NodeId, proposal: &Proposal) -> ProposalOutcome;
}

/// Retry budget for consensus attempts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Timeouts tolerated before giving up.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Leader hints followed before giving up.
    pub max_redirects: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            max_redirects: 3,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32)) as u128;
        let backoff = Duration::from_millis(backoff_ms.min(u64::MAX as u128) as u64);
        backoff.min(self.max_backoff)
    }
}

/// Drives one proposal to a decision or to `Unavailable`.
pub struct ProposalDriver<C: ?Sized> {
    coordinator: Arc<C>,
    retry: RetryConfig,
}

impl<C: ConsensusCoordinator + ?Sized> ProposalDriver<C> {
    pub fn new(coordinator: Arc<C>, retry: RetryConfig) -> Self {
        Self { coordinator, retry }
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub async fn drive(&self, proposal: &Proposal) -> Result<Decision> {
        let mut via = proposal.origin.clone();
        let mut attempts = 0u32;
        let mut timeouts = 0u32;
        let mut redirects = 0u32;

        loop {
            attempts += 1;
            match self.coordinator.propose(&via, proposal).await {
                ProposalOutcome::Decided(decision) => {
                    debug!(
                        proposal = %proposal.id,
                        slot = decision.slot,
                        attempts,
                        "proposal decided"
                    );
                    return Ok(decision);
                }
                ProposalOutcome::NotLeader {
                    leader: Some(leader),
                } if redirects < self.retry.max_redirects => {
                    redirects += 1;
                    debug!(proposal = %proposal.id, %leader, "redirecting to leader");
                    via = leader;
                }
                ProposalOutcome::NotLeader { leader: Some(_) } => {
                    warn!(proposal = %proposal.id, redirects, "redirect budget exhausted");
                    return Err(self.unavailable(proposal, attempts, redirects));
                }
                ProposalOutcome::Timeout | ProposalOutcome::NotLeader { leader: None } => {
                    if timeouts >= self.retry.max_retries {
                        warn!(proposal = %proposal.id, attempts, "consensus retries exhausted");
                        return Err(self.unavailable(proposal, attempts, redirects));
                    }
                    let backoff = self.retry.backoff_for_attempt(timeouts);
                    timeouts += 1;
                    debug!(
                        proposal = %proposal.id,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "consensus timeout, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn unavailable(&self, proposal: &Proposal, attempts: u32, redirects: u32) -> NodeError {
        NodeError::Unavailable {
            proposal: proposal.id,
            attempts,
            redirects,
        }
    }
}

/// What happened to a decision handed to the [`DecisionLog`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionStatus {
    /// The decision filled the next slot; these decisions are now
    /// applicable, in order. Slots replaying an applied proposal are left out.
    Ready(Vec<Decision>),
    /// The slot was filled, but only by proposals already applied at an
    /// earlier slot. Nothing to apply.
    Replayed,
    /// The decision is ahead of a gap and waits.
    Buffered,
    /// The slot was already applied or buffered.
    Duplicate,
}

/// Applies decisions strictly in slot order, each proposal exactly once.
#[derive(Clone, Debug, Default)]
pub struct DecisionLog {
    next_slot: u64,
    buffered: BTreeMap<u64, Decision>,
    applied: BTreeSet<ProposalId>,
    replayed: u64,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, decision: Decision) -> DecisionStatus {
        if decision.slot < self.next_slot || self.buffered.contains_key(&decision.slot) {
            return DecisionStatus::Duplicate;
        }
        if decision.slot > self.next_slot {
            self.buffered.insert(decision.slot, decision);
            return DecisionStatus::Buffered;
        }

        let mut ready = Vec::new();
        let mut next = Some(decision);
        while let Some(decision) = next {
            self.next_slot += 1;
            if self.applied.insert(decision.proposal.id) {
                ready.push(decision);
            } else {
                self.replayed += 1;
                warn!(
                    slot = decision.slot,
                    proposal = %decision.proposal.id,
                    "proposal decided at a second slot, skipping its operations"
                );
            }
            next = self.buffered.remove(&self.next_slot);
        }

        if ready.is_empty() {
            DecisionStatus::Replayed
        } else {
            DecisionStatus::Ready(ready)
        }
    }

    /// Slot the log is waiting for; also the number of consumed slots.
    pub fn next_slot(&self) -> u64 {
        self.next_slot
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_applied(&self, slot: u64) -> bool {
        slot < self.next_slot
    }

    pub fn is_proposal_applied(&self, id: &ProposalId) -> bool {
        self.applied.contains(id)
    }

    /// Slots skipped because their proposal had already been applied.
    pub fn replayed_count(&self) -> u64 {
        self.replayed
    }
}
