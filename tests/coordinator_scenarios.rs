//! Cluster-level control-loop scenarios: timeout enforcement, update-domain fan-out, and
//! orphan-task pruning. Drives `Coordinator::tick()` directly against the in-memory
//! platform so these are deterministic, single-tick assertions with no real time involved.

use fleet_patch_coordinator::config::{CoordinatorConfig, TaskApprovalPolicy};
use fleet_patch_coordinator::platform::clock::FakeClock;
use fleet_patch_coordinator::platform::health_bus::InMemoryHealthBus;
use fleet_patch_coordinator::platform::node_directory::InMemoryNodeDirectory;
use fleet_patch_coordinator::platform::repair_registry::InMemoryRepairRegistry;
use fleet_patch_coordinator::store::ResultStore;
use fleet_patch_coordinator::types::{
    ExecutorData, ExecutorSubState, Node, NodeMembership, RepairTask, RepairTaskState, ResultStatus,
    EXECUTOR, TASK_ID_PREFIX,
};
use fleet_patch_coordinator::Coordinator;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn node(name: &str, ud: &str) -> Node {
    Node {
        name: name.to_string(),
        membership: NodeMembership::Up,
        update_domain: ud.to_string(),
    }
}

fn claimed_task(node_name: &str, seq: u64, created_at: SystemTime) -> RepairTask {
    RepairTask {
        task_id: format!("{TASK_ID_PREFIX}_{node_name}_{seq}"),
        target: node_name.to_string(),
        state: RepairTaskState::Claimed,
        result_status: ResultStatus::Pending,
        executor: EXECUTOR.to_string(),
        executor_data_blob: ExecutorData::claimed(60).to_blob().unwrap(),
        approved_timestamp: None,
        impact: None,
        perform_preparing_health_check: false,
        created_at,
        version: 0,
    }
}

/// Scenario d: three nodes in UD 0, three in UD 1, all claimed, policy `UpgradeDomainWise`.
/// Expect all three UD-0 tasks promoted to `Preparing` in one tick, none of UD-1's.
#[tokio::test]
async fn ud_wise_fan_out_promotes_only_current_ud() {
    let nodes: Vec<Node> = (0..3)
        .map(|i| node(&format!("ud0-{i}"), "0"))
        .chain((0..3).map(|i| node(&format!("ud1-{i}"), "1")))
        .collect();
    let node_directory = InMemoryNodeDirectory::new(nodes.clone());
    let registry = InMemoryRepairRegistry::new();
    let clock = Arc::new(FakeClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000)));

    for (i, n) in nodes.iter().enumerate() {
        let seq = registry.next_seq();
        let created_at = clock.now() - Duration::from_secs((nodes.len() - i) as u64);
        registry
            .create(claimed_task(&n.name, seq, created_at))
            .await
            .unwrap();
    }

    let health_bus = InMemoryHealthBus::new();
    health_bus.register_service(fleet_patch_coordinator::coordinator::health::COORDINATOR_SERVICE);
    let mut config = CoordinatorConfig::default();
    config.task_approval_policy = TaskApprovalPolicy::UpgradeDomainWise;
    let results = ResultStore::new(&config);

    let coordinator = Coordinator::new(node_directory, registry.clone(), health_bus, results, clock, config);
    coordinator.tick().await.unwrap();

    let tasks = registry.list_by_prefix(TASK_ID_PREFIX).await.unwrap();
    let ud0_preparing = tasks
        .iter()
        .filter(|t| t.target.starts_with("ud0") && t.state == RepairTaskState::Preparing)
        .count();
    let ud1_preparing = tasks
        .iter()
        .filter(|t| t.target.starts_with("ud1") && t.state == RepairTaskState::Preparing)
        .count();
    assert_eq!(ud0_preparing, 3, "every UD-0 task should be promoted in one tick");
    assert_eq!(ud1_preparing, 0, "no UD-1 task should be touched until UD-0 clears");
}

/// Scenario e: a claimed task targets a node no longer in the node list. The coordinator
/// cancels it on the next tick rather than promoting it.
#[tokio::test]
async fn orphaned_claimed_task_is_cancelled() {
    let node_directory = InMemoryNodeDirectory::new(vec![node("n1", "0")]);
    let registry = InMemoryRepairRegistry::new();
    let clock = Arc::new(FakeClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000)));

    let seq = registry.next_seq();
    registry
        .create(claimed_task("ghost-node", seq, clock.now()))
        .await
        .unwrap();

    let health_bus = InMemoryHealthBus::new();
    health_bus.register_service(fleet_patch_coordinator::coordinator::health::COORDINATOR_SERVICE);
    let config = CoordinatorConfig::default();
    let results = ResultStore::new(&config);

    let coordinator = Coordinator::new(node_directory, registry.clone(), health_bus, results, clock, config);
    coordinator.tick().await.unwrap();

    let tasks = registry.list_by_prefix(TASK_ID_PREFIX).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, RepairTaskState::Completed);
    assert_eq!(tasks[0].result_status, ResultStatus::Cancelled);
}

/// Scenario c: a task approved at T0 with a 60-minute timeout and a 45-minute grace period
/// is still `InstallationInProgress` 106 minutes later. The next coordinator tick must
/// cancel it (move it to `Restoring`) so the following claimed task can be promoted.
#[tokio::test]
async fn timed_out_installation_is_cancelled_and_unblocks_next_node() {
    let node_directory = InMemoryNodeDirectory::new(vec![node("n1", "0"), node("n2", "0")]);
    let registry = InMemoryRepairRegistry::new();
    let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000);
    let clock = Arc::new(FakeClock::new(t0));

    let mut stuck_data = ExecutorData::claimed(60);
    stuck_data.sub_state = ExecutorSubState::InstallationInProgress;
    let stuck = RepairTask {
        task_id: format!("{TASK_ID_PREFIX}_n1_0"),
        target: "n1".to_string(),
        state: RepairTaskState::Executing,
        result_status: ResultStatus::Pending,
        executor: EXECUTOR.to_string(),
        executor_data_blob: stuck_data.to_blob().unwrap(),
        approved_timestamp: Some(t0),
        impact: None,
        perform_preparing_health_check: false,
        created_at: t0,
        version: 0,
    };
    registry.create(stuck).await.unwrap();

    let waiting_seq = registry.next_seq();
    registry
        .create(claimed_task("n2", waiting_seq, t0 + Duration::from_secs(1)))
        .await
        .unwrap();

    clock.advance(Duration::from_secs(106 * 60));

    let health_bus = InMemoryHealthBus::new();
    health_bus.register_service(fleet_patch_coordinator::coordinator::health::COORDINATOR_SERVICE);
    let mut config = CoordinatorConfig::default();
    config.grace_time_for_nt_service = Duration::from_secs(45 * 60);
    let results = ResultStore::new(&config);

    let coordinator = Coordinator::new(node_directory, registry.clone(), health_bus, results, clock, config);
    coordinator.tick().await.unwrap();

    let n1 = registry.get("POS_n1_0").await.unwrap().unwrap();
    assert_eq!(n1.state, RepairTaskState::Restoring);
    assert_eq!(n1.result_status, ResultStatus::Cancelled);

    // Next tick: n1 no longer occupies a disruption slot, so n2 can be promoted.
    coordinator.tick().await.unwrap();
    let n2 = registry.get(&format!("{TASK_ID_PREFIX}_n2_{waiting_seq}")).await.unwrap().unwrap();
    assert_eq!(n2.state, RepairTaskState::Preparing);
}

/// Invariant 1/2 spot check: under `NodeWise`, at most one task ever occupies a disruption
/// slot, even when multiple nodes have claimed tasks simultaneously.
#[tokio::test]
async fn node_wise_promotes_at_most_one_task_at_a_time() {
    let node_directory = InMemoryNodeDirectory::new(vec![node("n1", "0"), node("n2", "0"), node("n3", "0")]);
    let registry = InMemoryRepairRegistry::new();
    let clock = Arc::new(FakeClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_800_000_000)));

    for (i, name) in ["n1", "n2", "n3"].iter().enumerate() {
        let seq = registry.next_seq();
        let created_at = clock.now() + Duration::from_secs(i as u64);
        registry.create(claimed_task(name, seq, created_at)).await.unwrap();
    }

    let health_bus = InMemoryHealthBus::new();
    health_bus.register_service(fleet_patch_coordinator::coordinator::health::COORDINATOR_SERVICE);
    let config = CoordinatorConfig::default();
    let results = ResultStore::new(&config);

    let coordinator = Coordinator::new(node_directory, registry.clone(), health_bus, results, clock, config);
    coordinator.tick().await.unwrap();

    let tasks = registry.list_by_prefix(TASK_ID_PREFIX).await.unwrap();
    let disrupting = tasks.iter().filter(|t| t.is_disrupting()).count();
    assert_eq!(disrupting, 1, "NodeWise must promote exactly one task per tick");

    let promoted = tasks.iter().find(|t| t.state == RepairTaskState::Preparing).unwrap();
    assert_eq!(promoted.target, "n1", "the oldest claimed task should be promoted first");
}
