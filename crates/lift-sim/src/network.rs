//! Simulated gossip transport.
//!
//! Time is logical: every message is scheduled for a delivery tick and the
//! network hands messages out in tick order. All randomness comes from a
//! seeded [`StdRng`], so a run is reproducible from its seed.
//!
//! Faults:
//! - per-link delay plus random jitter
//! - reordering (a random extra delay on some messages)
//! - duplication (a second copy with its own delay)
//! - partitions: a message crossing a cut link is parked and released when
//!   the partition heals. Nothing is ever lost.

use lift_core::operation::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Network configuration for simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Ticks a message takes on a link without an explicit delay.
    pub base_delay: u64,
    /// Maximum random ticks added to every message.
    pub jitter: u64,
    /// Probability a message is delivered twice (0.0 - 1.0).
    pub dup_rate: f64,
    /// Probability a message is held back (0.0 - 1.0).
    pub reorder_rate: f64,
    /// Maximum extra ticks for a held-back message.
    pub reorder_window: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_delay: 1,
            jitter: 0,
            dup_rate: 0.0,
            reorder_rate: 0.0,
            reorder_window: 8,
        }
    }
}

impl NetworkConfig {
    /// In-order delivery with a fixed delay.
    pub fn reliable() -> Self {
        Self::default()
    }

    /// Create a network with duplicates.
    pub fn with_dups(dup_rate: f64) -> Self {
        Self {
            dup_rate,
            ..Default::default()
        }
    }

    /// Create a network that reorders messages.
    pub fn reordering(reorder_rate: f64) -> Self {
        Self {
            jitter: 3,
            reorder_rate,
            ..Default::default()
        }
    }

    /// Create a chaotic network (all problems).
    pub fn chaotic() -> Self {
        Self {
            base_delay: 1,
            jitter: 5,
            dup_rate: 0.2,
            reorder_rate: 0.3,
            reorder_window: 20,
        }
    }
}

/// A message addressed to one node.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope<M> {
    pub from: NodeId,
    pub to: NodeId,
    pub message: M,
}

/// Counters for everything the network did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub parked: u64,
}

/// Reachability of one link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Open,
    /// Cut until the given tick.
    CutUntil(u64),
    /// Cut until healed by hand.
    Cut,
}

#[derive(Clone, Debug)]
struct Partition {
    side: BTreeSet<NodeId>,
    heals_at: Option<u64>,
}

impl Partition {
    fn cuts(&self, a: &NodeId, b: &NodeId) -> bool {
        self.side.contains(a) != self.side.contains(b)
    }
}

/// Discrete-event network with a seeded RNG.
pub struct SimNetwork<M> {
    config: NetworkConfig,
    rng: StdRng,
    now: u64,
    next_seq: u64,
    queue: BTreeMap<(u64, u64), Envelope<M>>,
    parked: Vec<Envelope<M>>,
    link_delays: HashMap<(NodeId, NodeId), u64>,
    partitions: Vec<Partition>,
    stats: NetworkStats,
}

impl<M: Clone> SimNetwork<M> {
    pub fn new(config: NetworkConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            now: 0,
            next_seq: 0,
            queue: BTreeMap::new(),
            parked: Vec::new(),
            link_delays: HashMap::new(),
            partitions: Vec::new(),
            stats: NetworkStats::default(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Current logical time.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    /// Messages scheduled for delivery.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Messages waiting for a partition to heal.
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Nothing scheduled and nothing parked.
    pub fn is_quiescent(&self) -> bool {
        self.queue.is_empty() && self.parked.is_empty()
    }

    /// Fix the delay of the directed link `from -> to`.
    pub fn set_link_delay(&mut self, from: NodeId, to: NodeId, delay: u64) {
        self.link_delays.insert((from, to), delay);
    }

    /// Whether the link between `a` and `b` is currently cut.
    pub fn is_cut(&self, a: &NodeId, b: &NodeId) -> bool {
        self.partitions.iter().any(|p| p.cuts(a, b))
    }

    /// When, if ever, the link between `a` and `b` opens again.
    pub fn link_state(&self, a: &NodeId, b: &NodeId) -> LinkState {
        let mut until = None;
        for partition in self.partitions.iter().filter(|p| p.cuts(a, b)) {
            match partition.heals_at {
                Some(at) => until = Some(until.map_or(at, |u: u64| u.max(at))),
                None => return LinkState::Cut,
            }
        }
        until.map_or(LinkState::Open, LinkState::CutUntil)
    }

    /// Cut `side` off from everyone else. With a duration the partition
    /// heals on its own after that many ticks.
    pub fn partition(&mut self, side: impl IntoIterator<Item = NodeId>, duration: Option<u64>) {
        let side: BTreeSet<NodeId> = side.into_iter().collect();
        let heals_at = duration.map(|d| self.now + d);
        info!(?side, ?heals_at, now = self.now, "network partitioned");
        self.partitions.push(Partition { side, heals_at });
    }

    /// Remove every partition and release parked messages.
    pub fn heal_all(&mut self) {
        if self.partitions.is_empty() {
            return;
        }
        self.partitions.clear();
        info!(now = self.now, parked = self.parked.len(), "all partitions healed");
        self.release_parked();
    }

    /// Move the clock forward, healing partitions that expire on the way.
    pub fn advance(&mut self, ticks: u64) {
        self.now += ticks;
        self.heal_expired();
    }

    pub fn send(&mut self, from: NodeId, to: NodeId, message: M) {
        self.stats.sent += 1;
        let envelope = Envelope { from, to, message };

        if self.is_cut(&envelope.from, &envelope.to) {
            self.park(envelope);
            return;
        }

        if self.config.dup_rate > 0.0 && self.rng.gen::<f64>() < self.config.dup_rate {
            self.stats.duplicated += 1;
            self.schedule(envelope.clone());
        }
        self.schedule(envelope);
    }

    /// Deliver the next message, advancing logical time as needed.
    pub fn next_delivery(&mut self) -> Option<Envelope<M>> {
        loop {
            let next_heal = self.next_heal();
            let next_due = self.queue.keys().next().map(|(at, _)| *at);

            match (next_due, next_heal) {
                (Some(due), Some(heal)) if heal <= due => {
                    self.now = self.now.max(heal);
                    self.heal_expired();
                }
                (Some(_), _) => {
                    let ((due, _), envelope) = self.queue.pop_first()?;
                    self.now = self.now.max(due);
                    if self.is_cut(&envelope.from, &envelope.to) {
                        self.park(envelope);
                        continue;
                    }
                    self.stats.delivered += 1;
                    return Some(envelope);
                }
                (None, Some(heal)) => {
                    self.now = self.now.max(heal);
                    self.heal_expired();
                }
                (None, None) => return None,
            }
        }
    }

    fn schedule(&mut self, envelope: Envelope<M>) {
        let link = (envelope.from.clone(), envelope.to.clone());
        let mut delay = self
            .link_delays
            .get(&link)
            .copied()
            .unwrap_or(self.config.base_delay);
        if self.config.jitter > 0 {
            delay += self.rng.gen_range(0..=self.config.jitter);
        }
        if self.config.reorder_rate > 0.0 && self.rng.gen::<f64>() < self.config.reorder_rate {
            self.stats.reordered += 1;
            delay += self.rng.gen_range(1..=self.config.reorder_window.max(1));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((self.now + delay, seq), envelope);
    }

    fn park(&mut self, envelope: Envelope<M>) {
        debug!(from = %envelope.from, to = %envelope.to, "message parked behind partition");
        self.stats.parked += 1;
        self.parked.push(envelope);
    }

    fn next_heal(&self) -> Option<u64> {
        self.partitions.iter().filter_map(|p| p.heals_at).min()
    }

    fn heal_expired(&mut self) {
        let now = self.now;
        let before = self.partitions.len();
        self.partitions
            .retain(|p| p.heals_at.map_or(true, |at| at > now));
        if self.partitions.len() != before {
            info!(now, "partition healed");
            self.release_parked();
        }
    }

    fn release_parked(&mut self) {
        let parked = std::mem::take(&mut self.parked);
        for envelope in parked {
            if self.is_cut(&envelope.from, &envelope.to) {
                self.parked.push(envelope);
            } else {
                self.schedule(envelope);
            }
        }
    }
}
