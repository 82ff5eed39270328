//! The six Coordinator↔Agent operations (§4.3.1), modeled as one async trait so the CLI
//! adapter and any in-process caller share a single implementation.

use crate::error::Result;
use crate::platform::HealthState;
use crate::types::{ExecutorSubState, OperationResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// The data the source system persists to disk as `ExecutorDataForNtService` on every
/// `GetWuOperationState` call, so the agent can recompute its remaining install budget
/// (§4.2 "Install retries and time budget") even after a crash loses the in-memory
/// `ApprovedTimestamp`. Returned inline here rather than written to a side file the RPC
/// layer would have to know the calling node's work directory to reach; the agent is the
/// one with a work directory, so it persists this snapshot itself (`agent::Agent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorBudget {
    /// When the platform approved this task for execution.
    pub approved_timestamp: SystemTime,
    /// The task's total installation budget.
    pub executor_timeout_in_minutes: u32,
}

/// Result of `GetWuOperationState`: the current sub-state, plus the approval/timeout
/// snapshot needed for remaining-budget math whenever a task is at or past `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WuOperationState {
    /// The sub-state per the table in §4.3.1 op 1.
    pub sub_state: ExecutorSubState,
    /// Present once the task has been approved; `None` before then (e.g. `Claimed`).
    pub budget: Option<ExecutorBudget>,
}

/// The agent-facing RPC surface implemented by the coordinator.
///
/// All transitions are idempotent given the same input state (§4.3): replaying the same
/// call after a crash or a retried RPC must not double-apply an effect.
#[async_trait]
pub trait AgentCoordinatorRpc: Send + Sync {
    /// Looks up the oldest active repair task for `node_name` and returns its sub-state
    /// per the table in §4.3.1 op 1, plus the approved-timestamp/timeout snapshot the
    /// agent persists for its own remaining-budget computation.
    async fn get_wu_operation_state(&self, node_name: &str) -> Result<WuOperationState>;

    /// Report a search/download transition. `new_sub_state` must be one of
    /// `DownloadCompleted`, `OperationCompleted`, `OperationAborted`.
    async fn update_search_and_download_status(
        &self,
        node_name: &str,
        application_uri: &str,
        new_sub_state: ExecutorSubState,
        result: Option<OperationResult>,
        installation_timeout: Duration,
    ) -> Result<()>;

    /// Report an installation transition. `new_sub_state` must be one of
    /// `InstallationInProgress`, `InstallationCompleted`, `RestartRequested`,
    /// `RestartNotNeeded`, `RestartCompleted`, `OperationCompleted`.
    async fn update_installation_status(
        &self,
        node_name: &str,
        application_uri: &str,
        new_sub_state: ExecutorSubState,
        result: Option<OperationResult>,
    ) -> Result<()>;

    /// Enqueue a result with no associated task transition.
    async fn update_wu_operation_result(&self, result: OperationResult) -> Result<()>;

    /// Publish a health fact against `application_uri`, guarding on service readiness
    /// (§4.3.3) with the given overall deadline.
    async fn report_health(
        &self,
        application_uri: &str,
        property: &str,
        description: &str,
        state: HealthState,
        ttl: Duration,
        deadline: Duration,
    ) -> Result<()>;

    /// Whether `application_uri` is still deployed on this host.
    async fn get_application_deployed_status(&self, application_uri: &str) -> Result<()>;
}
