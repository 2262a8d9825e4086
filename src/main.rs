use lift_node::decompose::EscalationPolicy;
use tracing_subscriber::EnvFilter;
use workload::{run_workload, WorkloadConfig};
pub mod workload;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    // Optional JSON workload config as the only argument.
    let config = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => WorkloadConfig::default(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main(config));
    Ok(())
}

async fn async_main(config: WorkloadConfig) {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ESCALATION POLICY COMPARISON                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut fractions = Vec::new();
    for policy in [EscalationPolicy::KeyWide, EscalationPolicy::ConflictingPairs] {
        let stats = run_workload(&config, policy).await;
        stats.print();
        fractions.push((policy, stats.lifting_fraction, stats.converged));
    }

    println!();
    for (policy, fraction, converged) in &fractions {
        println!("  {:<18} L = {:.3}  converged: {}", format!("{:?}", policy), fraction, converged);
    }

    if fractions.iter().all(|(_, _, converged)| *converged) {
        println!("\n✓ All workloads converged");
    } else {
        println!("\n✗ Divergence detected, rerun with RUST_LOG=debug");
    }
}
