//! # lift-sim
//!
//! Deterministic test harness for Lift clusters:
//!
//! - [`network`]: logical-time gossip transport with delay, reordering,
//!   duplication and partitions
//! - [`consensus`]: a single-log sequencer implementing the consensus
//!   contract
//! - [`cluster`]: N nodes wired to both, with convergence checks

pub mod cluster;
pub mod consensus;
pub mod network;

pub use cluster::{ClusterConfig, ClusterStats, QuiescenceReport, SimulatedCluster};
pub use consensus::SimulatedConsensus;
pub use network::{Envelope, LinkState, NetworkConfig, NetworkStats, SimNetwork};
