use lift_core::operation::{Operation, Transaction};
use lift_node::config::NodeConfig;
use lift_node::consensus::RetryConfig;
use lift_node::decompose::EscalationPolicy;
use lift_sim::{ClusterConfig, NetworkConfig, SimulatedCluster};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

/// Shape of a generated workload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub nodes: usize,
    pub transactions: usize,
    pub max_ops_per_transaction: usize,
    /// Probability that an operation is an overwrite (0.0 - 1.0).
    pub generic_rate: f64,
    /// Number of distinct keys operations are drawn from.
    pub keys: usize,
    /// Submissions between two consensus rounds.
    pub batch: usize,
    pub seed: u64,
    pub network: NetworkConfig,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            nodes: 5,
            transactions: 500,
            max_ops_per_transaction: 4,
            generic_rate: 0.1,
            keys: 16,
            batch: 20,
            seed: 7,
            network: NetworkConfig::chaotic(),
        }
    }
}

/// Statistics collected during one workload run
#[derive(Clone, Debug)]
pub struct WorkloadStats {
    pub policy: EscalationPolicy,
    pub nodes: usize,
    pub transactions: usize,
    pub operations: usize,
    pub lifting_fraction: f64,
    pub proposals: usize,
    pub failed_proposals: usize,
    pub deliveries: u64,
    pub duplicates: usize,
    pub collected: usize,
    pub total_time: Duration,
    pub converged: bool,
}

impl WorkloadStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Workload Statistics                           ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Escalation Policy:         {:>30} ║", format!("{:?}", self.policy));
        println!("║  Nodes:                     {:>30} ║", self.nodes);
        println!("║  Transactions:              {:>30} ║", self.transactions);
        println!("║  Operations:                {:>30} ║", self.operations);
        println!("║  Lifting Fraction:          {:>30} ║", format!("{:.3}", self.lifting_fraction));
        println!("║  Consensus Proposals:       {:>30} ║", self.proposals);
        println!("║  Failed Proposals:          {:>30} ║", self.failed_proposals);
        println!("║  Gossip Deliveries:         {:>30} ║", self.deliveries);
        println!("║  Duplicates Dropped:        {:>30} ║", self.duplicates);
        println!("║  Updates Collected:         {:>30} ║", self.collected);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

fn random_operation(rng: &mut StdRng, config: &WorkloadConfig) -> Operation {
    let index = rng.gen_range(0..config.keys.max(1));
    let key = format!("k{}", index);
    if rng.gen::<f64>() < config.generic_rate {
        return Operation::overwrite(key, format!("v{}", rng.gen_range(0..100)));
    }
    // Keys keep one algebraic shape each, so only overwrites cause conflicts.
    match index % 3 {
        0 => Operation::increment(key, rng.gen_range(-5..=5)),
        1 => Operation::insert(key, format!("m{}", rng.gen_range(0..8))),
        _ => Operation::max(key, rng.gen_range(0..1000)),
    }
}

fn random_transaction(rng: &mut StdRng, config: &WorkloadConfig) -> Transaction {
    let len = rng.gen_range(1..=config.max_ops_per_transaction.max(1));
    (0..len).map(|_| random_operation(rng, config)).collect()
}

/// Run the workload through a simulated cluster under one escalation policy.
pub async fn run_workload(config: &WorkloadConfig, policy: EscalationPolicy) -> WorkloadStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Lift Workload ({:?})", policy);
    println!("║  Nodes: {} | Transactions: {} | Generic rate: {:.2}",
             config.nodes, config.transactions, config.generic_rate);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let node = NodeConfig::builder()
        .escalation(policy)
        .retry(RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(20),
            ..Default::default()
        })
        .build();
    let mut cluster = SimulatedCluster::new(ClusterConfig {
        nodes: config.nodes,
        seed: config.seed,
        network: config.network.clone(),
        node,
        ..Default::default()
    });

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut duplicates = 0;
    for i in 0..config.transactions {
        let origin = rng.gen_range(0..cluster.len());
        cluster.submit(origin, random_transaction(&mut rng, config));

        if (i + 1) % config.batch.max(1) == 0 {
            cluster.resolve_proposals().await;
            duplicates += cluster.run_until_quiescent().duplicates;
            info!(submitted = i + 1, "batch settled");
        }
    }
    duplicates += cluster.settle().await.duplicates;

    cluster.announce_frontiers();
    cluster.run_until_quiescent();
    let collected = cluster.collect_garbage();

    let stats = cluster.stats();
    WorkloadStats {
        policy,
        nodes: cluster.len(),
        transactions: stats.transactions,
        operations: stats.operations,
        lifting_fraction: stats.lifting_fraction(),
        proposals: stats.proposals,
        failed_proposals: stats.failed_proposals,
        deliveries: cluster.network_stats().delivered,
        duplicates,
        collected,
        total_time: start.elapsed(),
        converged: cluster.is_converged(),
    }
}
