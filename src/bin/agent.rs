//! Standalone runner for a single per-node update agent.
//!
//! Wires `Agent` over an in-process `CoordinatorRpcService` and the in-memory update
//! engine / OS policy / deployment fakes (§1 treats the real OS-update library and host
//! bindings as out-of-scope external collaborators). A real deployment links the agent
//! against the platform's own RPC transport instead; this binary exists so the scheduling
//! loop and update cycle can be exercised end-to-end without one.

use clap::Parser;
use fleet_patch_coordinator::agent::settings;
use fleet_patch_coordinator::config::{AgentRuntimeConfig, CoordinatorConfig};
use fleet_patch_coordinator::platform::clock::SystemClock;
use fleet_patch_coordinator::platform::deployment::InMemoryDeploymentDirectory;
use fleet_patch_coordinator::platform::health_bus::InMemoryHealthBus;
use fleet_patch_coordinator::platform::os_policy::InMemoryOsPolicy;
use fleet_patch_coordinator::platform::repair_registry::InMemoryRepairRegistry;
use fleet_patch_coordinator::platform::update_engine::FakeUpdateEngine;
use fleet_patch_coordinator::rpc::CoordinatorRpcService;
use fleet_patch_coordinator::store::ResultStore;
use fleet_patch_coordinator::types::NodeSettings;
use fleet_patch_coordinator::Agent;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(name = "patch-agent", about = "Runs a single per-node update agent")]
struct Args {
    /// Name of the node this agent represents.
    #[arg(long, default_value = "n1")]
    node_name: String,

    /// URI of the deployed application this agent tears down when undeployed.
    #[arg(long, default_value = "fabric:/PatchAgent")]
    application_uri: String,

    /// Work directory the agent owns (settings, checkpoint, temp files).
    #[arg(long)]
    work_dir: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let work_dir = std::path::PathBuf::from(&args.work_dir);
    tokio::fs::create_dir_all(&work_dir).await?;

    let settings_path = work_dir.join("Settings.xml");
    if !tokio::fs::try_exists(&settings_path).await.unwrap_or(false) {
        let xml = settings::render(&NodeSettings::default())?;
        tokio::fs::write(&settings_path, xml).await?;
        tracing::info!(path = %settings_path.display(), "wrote default settings file");
    }

    let coordinator_config = CoordinatorConfig::default();
    let registry = InMemoryRepairRegistry::new();
    let health_bus = InMemoryHealthBus::new();
    health_bus.register_service(args.application_uri.as_str());
    let results = ResultStore::new(&coordinator_config);
    let clock = Arc::new(SystemClock);
    let deployment = InMemoryDeploymentDirectory::new([args.application_uri.clone()]);

    let rpc = CoordinatorRpcService::new(
        registry,
        health_bus,
        results,
        clock.clone(),
        deployment.clone(),
    );

    let agent = Arc::new(Agent::new(
        args.node_name.clone(),
        args.application_uri.clone(),
        work_dir,
        rpc,
        FakeUpdateEngine::new(),
        InMemoryOsPolicy::new(),
        deployment,
        clock,
        AgentRuntimeConfig::default(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run(shutdown_rx).await }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c; shutting down");
    let _ = shutdown_tx.send(true);
    run_handle.await??;
    Ok(())
}
