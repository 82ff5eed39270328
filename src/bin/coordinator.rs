//! Standalone runner for the cluster-level control loop.
//!
//! Wires `Coordinator` over the in-memory reference platform (§1 treats the real repair
//! registry, health bus, and node directory as out-of-scope external collaborators) and
//! runs it until Ctrl-C. Useful for exercising the control loop against a seeded node list
//! without a real cluster; not a substitute for a production deployment's actual platform
//! bindings.

use clap::Parser;
use fleet_patch_coordinator::config::CoordinatorConfig;
use fleet_patch_coordinator::coordinator::health::COORDINATOR_SERVICE;
use fleet_patch_coordinator::platform::clock::SystemClock;
use fleet_patch_coordinator::platform::health_bus::InMemoryHealthBus;
use fleet_patch_coordinator::platform::node_directory::InMemoryNodeDirectory;
use fleet_patch_coordinator::platform::repair_registry::InMemoryRepairRegistry;
use fleet_patch_coordinator::store::ResultStore;
use fleet_patch_coordinator::types::{Node, NodeMembership};
use fleet_patch_coordinator::Coordinator;
use std::sync::Arc;
use tokio::sync::watch;

/// `name:updateDomain` pairs describing the cluster to coordinate, e.g. `n1:0,n2:0,n3:1`.
#[derive(Debug, Parser)]
#[command(name = "patch-coordinator", about = "Runs the cluster patch-coordination control loop")]
struct Args {
    /// Comma-separated `name:updateDomain` pairs. Defaults to a single node `n1:0`.
    #[arg(long, default_value = "n1:0")]
    nodes: String,

    /// Override `PollingFrequencyInSec` (seconds).
    #[arg(long)]
    poll_seconds: Option<u64>,
}

fn parse_nodes(spec: &str) -> Vec<Node> {
    spec.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, ':');
            let name = parts.next().unwrap_or_default().trim().to_string();
            let update_domain = parts.next().unwrap_or("0").trim().to_string();
            Node {
                name,
                membership: NodeMembership::Up,
                update_domain,
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let nodes = parse_nodes(&args.nodes);
    tracing::info!(count = nodes.len(), "seeding node directory");

    let mut config = CoordinatorConfig::default();
    if let Some(poll_seconds) = args.poll_seconds {
        config.polling_frequency = std::time::Duration::from_secs(poll_seconds);
    }

    let node_directory = InMemoryNodeDirectory::new(nodes);
    let repair_registry = InMemoryRepairRegistry::new();
    let health_bus = InMemoryHealthBus::new();
    health_bus.register_service(COORDINATOR_SERVICE);
    let results = ResultStore::new(&config);
    let clock = Arc::new(SystemClock);

    let coordinator = Arc::new(Coordinator::new(
        node_directory,
        repair_registry,
        health_bus,
        results,
        clock,
        config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn(coordinator.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c; shutting down");
    let _ = shutdown_tx.send(true);
    run_handle.await??;
    Ok(())
}
