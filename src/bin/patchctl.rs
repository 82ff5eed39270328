//! Process-boundary entry point for the agent-side helper (§4.3.4, §6).
//!
//! Parses `argv`, dispatches through [`fleet_patch_coordinator::rpc::cli`], and exits with
//! the numeric code from §4.3.2. The real deployment wires this process's `rpc` argument
//! to the platform's own RPC transport; since that transport binding is out of scope here
//! (§1), this binary builds a fresh in-memory `CoordinatorRpcService` per invocation. That
//! makes it useful for exercising the CLI/exit-code contract in isolation, but it does not
//! share state across separate `patchctl` invocations the way a real deployment would.

use clap::Parser;
use fleet_patch_coordinator::config::CoordinatorConfig;
use fleet_patch_coordinator::platform::clock::SystemClock;
use fleet_patch_coordinator::platform::deployment::InMemoryDeploymentDirectory;
use fleet_patch_coordinator::platform::health_bus::InMemoryHealthBus;
use fleet_patch_coordinator::platform::repair_registry::InMemoryRepairRegistry;
use fleet_patch_coordinator::rpc::cli::Cli;
use fleet_patch_coordinator::rpc::CoordinatorRpcService;
use fleet_patch_coordinator::store::ResultStore;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = CoordinatorConfig::default();
    let registry = InMemoryRepairRegistry::new();
    let health_bus = InMemoryHealthBus::new();
    let results = ResultStore::new(&config);
    let clock = Arc::new(SystemClock);
    let deployment = InMemoryDeploymentDirectory::new([]);

    let rpc = CoordinatorRpcService::new(registry, health_bus, results, clock, deployment);

    let code = fleet_patch_coordinator::rpc::cli::run(cli.command, rpc.as_ref()).await;
    std::process::exit(code);
}
