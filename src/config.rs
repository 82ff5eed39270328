//! Coordinator-side configuration (§6 "Settings recognized: Coordinator").

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The coordinator's approval policy (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskApprovalPolicy {
    /// At most one task in a disrupting state across the whole cluster.
    NodeWise,
    /// At most one update domain in a disrupting state across the whole cluster.
    UpgradeDomainWise,
}

/// Coordinator-side configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How often the control loop ticks.
    pub polling_frequency: Duration,
    /// Maximum number of `OperationResult`s retained in the result store.
    pub max_results_to_cache: usize,
    /// Approval policy.
    pub task_approval_policy: TaskApprovalPolicy,
    /// Only consider claimed tasks for nodes that are currently `Up`.
    pub install_on_up_nodes_only: bool,
    /// Whether the coordinator manages (cancels) timed-out tasks.
    pub manage_repair_tasks_on_timeout: bool,
    /// Per-platform-call deadline.
    pub default_timeout_for_operation: Duration,
    /// Extra grace period added to a task's own timeout before cancelling it.
    pub grace_time_for_nt_service: Duration,
    /// Minimum wait time enforced between promoting successive nodes (0 disables).
    pub min_wait_time_between_nodes: Duration,
    /// Consecutive stalled ticks (claimed tasks exist, nothing processing) before the
    /// coordinator raises a starvation warning.
    pub starvation_warning_ticks: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            polling_frequency: Duration::from_secs(60),
            max_results_to_cache: 3000,
            task_approval_policy: TaskApprovalPolicy::NodeWise,
            install_on_up_nodes_only: true,
            manage_repair_tasks_on_timeout: true,
            default_timeout_for_operation: Duration::from_secs(5 * 60),
            grace_time_for_nt_service: Duration::from_secs(45 * 60),
            min_wait_time_between_nodes: Duration::from_secs(0),
            starvation_warning_ticks: 60,
        }
    }
}

/// Agent-side scheduler configuration that isn't part of `NodeSettings` (i.e. constants
/// rather than hot-reloadable settings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentRuntimeConfig {
    /// Interval of the outer scheduling loop (§4.2: "every 5 minutes wall-clock").
    pub scheduler_tick: Duration,
    /// Wait applied after a transient failure before retrying (§5: `WaitTimeInMinutes=5`).
    pub transient_retry_wait: Duration,
    /// Overall deadline for the agent's own `ReportHealth` calls (§4.3.3 readiness wait).
    pub health_report_deadline: Duration,
    /// Poll interval while waiting for the settings file to first appear.
    pub settings_poll_interval: Duration,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler_tick: Duration::from_secs(5 * 60),
            transient_retry_wait: Duration::from_secs(5 * 60),
            health_report_deadline: Duration::from_secs(30),
            settings_poll_interval: Duration::from_secs(5),
        }
    }
}
