//! Shared data model: repair tasks, executor sub-state, nodes, and operation results.
//!
//! This module is the sum-type core the rest of the crate builds on (§9 "state machine
//! first-class"): `RepairTaskState` and `ExecutorSubState` are plain enums, and every
//! transition is validated by the state machine in `crate::coordinator` / `crate::agent`
//! rather than by ad hoc checks scattered through the codebase.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Stable literal identifying this system as the executor of a repair task.
pub const EXECUTOR: &str = "POS";

/// Prefix used for task IDs and for scoping registry listings.
pub const TASK_ID_PREFIX: &str = "POS";

/// Fixed category GUID implicitly whitelisted when `InstallWindowsOSOnlyUpdates` is set.
pub const OS_UPDATES_CATEGORY_ID: &str = "6964aab4-c5b5-43bd-a17d-ffb4346a8e1d";

/// A node's reachability as observed by the platform's membership view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeMembership {
    /// The node is up and serving traffic.
    Up,
    /// The node is down.
    Down,
    /// Any other platform-defined status (e.g. transitioning).
    Other,
}

/// A cluster node as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node name, unique within the cluster.
    pub name: String,
    /// Current membership status.
    pub membership: NodeMembership,
    /// Update-domain label used by the `UpgradeDomainWise` policy.
    pub update_domain: String,
}

/// Cluster-side state of a repair task, owned by the platform repair registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairTaskState {
    /// Just created, not yet claimed by any executor pass.
    Created,
    /// Claimed by this executor; awaiting approval.
    Claimed,
    /// Promoted by the coordinator; awaiting platform health check and node disable.
    Preparing,
    /// Platform has disabled the node and approved execution.
    Approved,
    /// The agent is actively installing.
    Executing,
    /// Execution finished (or was cancelled); platform is restoring the node.
    Restoring,
    /// Terminal state.
    Completed,
}

impl std::fmt::Display for RepairTaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Whether the work described by a repair task ultimately succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    /// No result yet.
    Pending,
    /// Completed successfully.
    Succeeded,
    /// Cancelled, e.g. by the coordinator's timeout pass.
    Cancelled,
    /// Failed.
    Failed,
}

/// The agent's nested per-task state, stored inside `ExecutorData`.
///
/// Advances monotonically along the documented path except for the terminal
/// `OperationAborted` branch, which can be reached from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorSubState {
    /// No operation in progress.
    None,
    /// Search and download finished; awaiting installation approval.
    DownloadCompleted,
    /// The coordinator has approved installation.
    InstallationApproved,
    /// Installation is actively running.
    InstallationInProgress,
    /// Installation finished.
    InstallationCompleted,
    /// A reboot has been requested.
    RestartRequested,
    /// The reboot has completed (observed via system boot time).
    RestartCompleted,
    /// No reboot was required.
    RestartNotNeeded,
    /// The whole operation (this task) is complete.
    OperationCompleted,
    /// Terminal: the operation was abandoned.
    OperationAborted,
}

impl ExecutorSubState {
    /// Numeric wire value per §4.3.2 ("positive values are reserved for sub-states").
    pub fn code(self) -> i32 {
        match self {
            ExecutorSubState::None => 1,
            ExecutorSubState::DownloadCompleted => 2,
            ExecutorSubState::InstallationApproved => 3,
            ExecutorSubState::InstallationInProgress => 4,
            ExecutorSubState::InstallationCompleted => 5,
            ExecutorSubState::RestartRequested => 6,
            ExecutorSubState::RestartCompleted => 7,
            ExecutorSubState::RestartNotNeeded => 8,
            ExecutorSubState::OperationCompleted => 9,
            // 10 is intentionally unused in the source contract; OperationAborted is 11.
            ExecutorSubState::OperationAborted => 11,
        }
    }

    /// Whether `next` is a legal successor of `self`, per the documented path in §3.
    ///
    /// `OperationAborted` is reachable from any non-terminal state; `OperationCompleted`
    /// looping back to `None` is the one cycle in the diagram (a finished task's sub-state
    /// resets once the coordinator's timeout/approval pass recycles the node).
    pub fn can_advance_to(self, next: ExecutorSubState) -> bool {
        use ExecutorSubState::*;
        if next == OperationAborted {
            return !matches!(self, OperationAborted);
        }
        matches!(
            (self, next),
            (None, DownloadCompleted)
                | (None, OperationCompleted)
                | (DownloadCompleted, InstallationApproved)
                | (InstallationApproved, InstallationInProgress)
                | (InstallationInProgress, InstallationCompleted)
                | (InstallationCompleted, RestartRequested)
                | (InstallationCompleted, RestartNotNeeded)
                | (RestartRequested, RestartCompleted)
                | (RestartCompleted, OperationCompleted)
                | (RestartNotNeeded, OperationCompleted)
                | (OperationCompleted, None)
        ) || self == next
    }
}

/// Reason the coordinator is disabling/restarting a node when promoting to `Preparing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Impact {
    /// The node will be restarted.
    Restart(String),
}

/// The core's private per-task payload, stored by the platform as an opaque blob in
/// `RepairTask::executor_data_blob`. Unlike the source system (which treats this as an
/// opaque string owned by the core but never schema-checked by the registry), this crate
/// models both ends of the encoding explicitly and round-trips it through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorData {
    /// The agent's nested state.
    pub sub_state: ExecutorSubState,
    /// Per-task installation budget.
    pub executor_timeout_in_minutes: u32,
    /// Set when a reboot is requested; used to detect that it has occurred.
    pub restart_requested_time: Option<SystemTime>,
}

impl ExecutorData {
    /// Construct the payload written when a task is first claimed.
    pub fn claimed(executor_timeout_in_minutes: u32) -> Self {
        Self {
            sub_state: ExecutorSubState::DownloadCompleted,
            executor_timeout_in_minutes,
            restart_requested_time: None,
        }
    }

    /// Serialize to the opaque blob format stored on the repair task.
    pub fn to_blob(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the opaque blob format back into structured data.
    pub fn from_blob(blob: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(blob)?)
    }
}

/// A durable repair-task record as owned by the platform repair registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairTask {
    /// Stable task identifier, prefixed with `TASK_ID_PREFIX`.
    pub task_id: String,
    /// The single node this task targets.
    pub target: String,
    /// Cluster-side state.
    pub state: RepairTaskState,
    /// Outcome of the work, if known.
    pub result_status: ResultStatus,
    /// Executor literal; tasks with a different executor are ignored by this system.
    pub executor: String,
    /// Opaque blob holding the serialized `ExecutorData`.
    pub executor_data_blob: String,
    /// Set by the platform on entry to `Approved`.
    pub approved_timestamp: Option<SystemTime>,
    /// Set by the core when promoting to `Preparing`.
    pub impact: Option<Impact>,
    /// Set by the core when promoting to `Preparing`.
    pub perform_preparing_health_check: bool,
    /// Creation time, used to pick the oldest claimed task.
    pub created_at: SystemTime,
    /// Optimistic-concurrency token; every write-back must echo the version last read.
    pub version: u64,
}

impl RepairTask {
    /// Decode this task's executor data.
    pub fn executor_data(&self) -> crate::error::Result<ExecutorData> {
        ExecutorData::from_blob(&self.executor_data_blob)
    }

    /// Whether this task is "active": any state other than `Completed`.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, RepairTaskState::Completed)
    }

    /// Whether this task is in one of the states that occupy a "disruption slot"
    /// (`Preparing | Approved | Executing | Restoring`).
    pub fn is_disrupting(&self) -> bool {
        matches!(
            self.state,
            RepairTaskState::Preparing
                | RepairTaskState::Approved
                | RepairTaskState::Executing
                | RepairTaskState::Restoring
        )
    }
}

/// The two kinds of update operation an agent reports results for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    /// Searching for and downloading applicable updates.
    SearchAndDownload,
    /// Installing previously downloaded updates.
    Installation,
}

/// Outcome of one operation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationOutcome {
    /// Completed with no errors.
    Succeeded,
    /// Completed but some individual updates failed.
    SucceededWithErrors,
    /// Failed outright.
    Failed,
    /// Aborted by a cancellation request.
    Aborted,
    /// Aborted because its wall-clock budget ran out.
    AbortedWithTimeout,
}

impl OperationOutcome {
    /// Whether this outcome should suppress a reschedule (§7: "Only `Succeeded` avoids
    /// reschedule").
    pub fn avoids_reschedule(self) -> bool {
        matches!(self, OperationOutcome::Succeeded)
    }
}

/// Per-update result code as reported by the (external) update engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateResultCode {
    /// The individual update installed successfully.
    Succeeded,
    /// The individual update failed.
    Failed,
    /// The individual update did not apply to this host.
    NotApplicable,
}

/// Detail for a single update within a search/download/install result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDetail {
    /// Engine-assigned update identifier.
    pub update_id: String,
    /// Human-readable title.
    pub title: String,
    /// Human-readable description.
    pub description: String,
    /// Per-update result.
    pub result_code: UpdateResultCode,
    /// Raw HRESULT (or platform-equivalent) from the update engine.
    pub hresult: i32,
}

/// Immutable record of one (node, operation kind) attempt, created by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    /// Node the operation ran on.
    pub node_name: String,
    /// Time the result was recorded.
    pub operation_time: SystemTime,
    /// Time the operation started.
    pub operation_start_time: SystemTime,
    /// Which kind of operation this is.
    pub operation_type: OperationType,
    /// Outcome of the operation.
    pub operation_result: OperationOutcome,
    /// Per-update detail, if any updates were involved.
    pub update_details: Vec<UpdateDetail>,
    /// The query string used to search for updates.
    pub windows_update_query: String,
    /// The frequency spec in effect when the operation ran.
    pub windows_update_frequency: String,
    /// Whether a reboot is required as a result of this operation.
    pub reboot_required: bool,
}

impl OperationResult {
    /// Build the dummy "no updates found" result posted when search returns zero results.
    pub fn no_updates_found(node_name: &str, query: &str, frequency: &str, start: SystemTime) -> Self {
        Self {
            node_name: node_name.to_string(),
            operation_time: SystemTime::now(),
            operation_start_time: start,
            operation_type: OperationType::SearchAndDownload,
            operation_result: OperationOutcome::Succeeded,
            update_details: Vec::new(),
            windows_update_query: query.to_string(),
            windows_update_frequency: frequency.to_string(),
            reboot_required: false,
        }
    }
}

/// On-disk per-node scheduling checkpoint (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointFileData {
    /// Next time an update cycle should run. `SystemTime::UNIX_EPOCH` means "disabled".
    pub scheduling_date_time: SystemTime,
    /// Number of times the current cycle has been rescheduled.
    pub reschedule_count: u32,
    /// Whether the last cycle requested a reschedule.
    pub reschedule_needed: bool,
    /// The last time an update cycle was attempted, if any.
    pub last_attempted_update_time: Option<SystemTime>,
}

impl CheckpointFileData {
    /// A freshly-initialized checkpoint for the given next-scheduled time.
    pub fn fresh(next: SystemTime) -> Self {
        Self {
            scheduling_date_time: next,
            reschedule_count: 0,
            reschedule_needed: false,
            last_attempted_update_time: None,
        }
    }
}

/// Per-node settings mirror (`Settings.xml`, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// The update-engine query string.
    pub wu_query: String,
    /// Retry count per operation (search/download/install).
    pub wu_operation_retry_count: u32,
    /// Delay between retries.
    pub wu_delay_between_retries_in_minutes: u32,
    /// Per-operation timeout.
    pub wu_operation_timeout_in_minutes: u32,
    /// Reschedule delay when a cycle can't complete.
    pub wu_reschedule_time_in_minutes: u32,
    /// Maximum reschedules before forcing a machine reset.
    pub wu_reschedule_count: u32,
    /// When update cycles should run.
    pub wu_frequency: FrequencySpec,
    /// Disable the OS's own automatic-update mechanism.
    pub disable_auto_update_setting_in_os: bool,
    /// Generic operation timeout (e.g. for RPC calls).
    pub operation_timeout_in_minutes: u32,
    /// Implicitly whitelist the OS-updates category.
    pub install_windows_os_only_updates: bool,
    /// Comma-separated category GUID whitelist; empty means "no filtering".
    pub wu_query_category_ids: Vec<String>,
    /// Automatically accept EULAs for updates that require one.
    pub accept_windows_update_eula: bool,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            wu_query: "IsInstalled=0".to_string(),
            wu_operation_retry_count: 5,
            wu_delay_between_retries_in_minutes: 1,
            wu_operation_timeout_in_minutes: 90,
            wu_reschedule_time_in_minutes: 30,
            wu_reschedule_count: 5,
            wu_frequency: FrequencySpec::Weekly {
                day_of_week: chrono::Weekday::Wed,
                time: chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            },
            disable_auto_update_setting_in_os: true,
            operation_timeout_in_minutes: 5,
            install_windows_os_only_updates: false,
            wu_query_category_ids: Vec::new(),
            accept_windows_update_eula: true,
        }
    }
}

impl NodeSettings {
    /// The effective category whitelist, with the implicit OS-updates category appended
    /// when `install_windows_os_only_updates` is set (§4.2 EULA/category filtering).
    pub fn effective_category_whitelist(&self) -> Vec<String> {
        let mut ids = self.wu_query_category_ids.clone();
        if self.install_windows_os_only_updates
            && !ids.iter().any(|id| id == OS_UPDATES_CATEGORY_ID)
        {
            ids.push(OS_UPDATES_CATEGORY_ID.to_string());
        }
        ids
    }
}

/// A frequency specification for scheduling update cycles (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencySpec {
    /// Never run.
    None,
    /// Run once at a specific date and time.
    Once {
        /// Calendar date.
        date: chrono::NaiveDate,
        /// Time of day.
        time: chrono::NaiveTime,
    },
    /// Run every day at a given time.
    Daily {
        /// Time of day.
        time: chrono::NaiveTime,
    },
    /// Run weekly on a given day at a given time.
    Weekly {
        /// Day of week.
        day_of_week: chrono::Weekday,
        /// Time of day.
        time: chrono::NaiveTime,
    },
    /// Run monthly on a given day-of-month at a given time. `day = 0` means "last day".
    Monthly {
        /// Day of month, or `0` for "last day of month".
        day: u32,
        /// Time of day.
        time: chrono::NaiveTime,
    },
    /// Run on the n-th weekday of the month (`n` in `1..=4`).
    MonthlyByWeekAndDay {
        /// Which occurrence (1st through 4th).
        occurrence: u8,
        /// Day of week.
        day_of_week: chrono::Weekday,
        /// Time of day.
        time: chrono::NaiveTime,
    },
    /// Run every `minutes` minutes.
    Hourly {
        /// Minutes between runs.
        minutes: u32,
    },
}
