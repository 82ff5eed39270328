//! Process-boundary adapter for the agent-side helper (§6): parses `argv`, invokes the
//! matching [`AgentCoordinatorRpc`] operation, and translates the result into the exit
//! code contract of §4.3.2. This is the only place in the crate allowed to produce a raw
//! integer process exit code.

use crate::error::{CoordError, Result};
use crate::platform::HealthState;
use crate::rpc::codes::RpcCode;
use crate::rpc::contract::AgentCoordinatorRpc;
use crate::types::{ExecutorSubState, OperationResult};
use clap::{Parser, Subcommand};
use std::time::Duration;

/// The five commands exposed across the CLI process boundary (§6). `UpdateWuOperationResult`
/// is reachable only through the in-process trait; it never crosses this boundary in the
/// source contract.
#[derive(Debug, Parser)]
#[command(name = "patchctl", about = "Agent-side helper for the Coordinator RPC boundary")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// `GetWuOperationState <nodeName> <timeoutSeconds>`
    GetWuOperationState {
        node_name: String,
        timeout_seconds: u64,
    },
    /// `UpdateSearchAndDownloadStatus <nodeName> <applicationUri> <subState> <installationTimeoutMinutes> <timeoutSeconds> [<resultFilePath>]`
    UpdateSearchAndDownloadStatus {
        node_name: String,
        application_uri: String,
        sub_state: String,
        installation_timeout_minutes: u64,
        timeout_seconds: u64,
        result_file_path: Option<String>,
    },
    /// `UpdateInstallationStatus <nodeName> <applicationUri> <subState> <timeoutSeconds> [<resultFilePath>]`
    UpdateInstallationStatus {
        node_name: String,
        application_uri: String,
        sub_state: String,
        timeout_seconds: u64,
        result_file_path: Option<String>,
    },
    /// `ReportHealth <applicationUri> <property> <description> <healthState> <ttlMinutes> <timeoutSeconds>`
    ReportHealth {
        application_uri: String,
        property: String,
        description: String,
        health_state: String,
        ttl_minutes: u64,
        timeout_seconds: u64,
    },
    /// `GetApplicationDeployedStatus <applicationUri> <timeoutSeconds>`
    GetApplicationDeployedStatus {
        application_uri: String,
        timeout_seconds: u64,
    },
}

/// Parse a sub-state argument. Case-sensitive, matching the wire names exactly (§6).
fn parse_sub_state(value: &str) -> Result<ExecutorSubState> {
    match value {
        "None" => Ok(ExecutorSubState::None),
        "DownloadCompleted" => Ok(ExecutorSubState::DownloadCompleted),
        "InstallationApproved" => Ok(ExecutorSubState::InstallationApproved),
        "InstallationInProgress" => Ok(ExecutorSubState::InstallationInProgress),
        "InstallationCompleted" => Ok(ExecutorSubState::InstallationCompleted),
        "RestartRequested" => Ok(ExecutorSubState::RestartRequested),
        "RestartCompleted" => Ok(ExecutorSubState::RestartCompleted),
        "RestartNotNeeded" => Ok(ExecutorSubState::RestartNotNeeded),
        "OperationCompleted" => Ok(ExecutorSubState::OperationCompleted),
        "OperationAborted" => Ok(ExecutorSubState::OperationAborted),
        other => Err(CoordError::InvalidArgument(format!(
            "unrecognized sub-state {other:?}"
        ))),
    }
}

/// Parse a health-state argument. Case-sensitive.
fn parse_health_state(value: &str) -> Result<HealthState> {
    match value {
        "Ok" => Ok(HealthState::Ok),
        "Warning" => Ok(HealthState::Warning),
        "Error" => Ok(HealthState::Error),
        other => Err(CoordError::InvalidArgument(format!(
            "unrecognized health state {other:?}"
        ))),
    }
}

/// Load an `OperationResult` from a JSON file, if a path was given.
fn load_result(path: Option<&str>) -> Result<Option<OperationResult>> {
    match path {
        None => Ok(None),
        Some(path) => {
            let contents = std::fs::read_to_string(path)?;
            Ok(Some(serde_json::from_str(&contents)?))
        }
    }
}

fn command_timeout(command: &Command) -> Duration {
    let secs = match command {
        Command::GetWuOperationState { timeout_seconds, .. }
        | Command::UpdateSearchAndDownloadStatus { timeout_seconds, .. }
        | Command::UpdateInstallationStatus { timeout_seconds, .. }
        | Command::ReportHealth { timeout_seconds, .. }
        | Command::GetApplicationDeployedStatus { timeout_seconds, .. } => *timeout_seconds,
    };
    Duration::from_secs(secs)
}

/// Run one CLI command against `rpc`, returning the process exit code it should map to.
/// Enforces the caller-supplied `timeoutSeconds` as an overall deadline per §4.3's
/// per-operation-deadline contract, reporting `TimeoutException` if it elapses.
pub async fn run(command: Command, rpc: &dyn AgentCoordinatorRpc) -> i32 {
    let deadline = command_timeout(&command);
    let outcome: Result<RpcCode> = match tokio::time::timeout(deadline, dispatch(command, rpc)).await {
        Ok(result) => result,
        Err(_) => Err(CoordError::Timeout(deadline)),
    };
    match outcome {
        Ok(code) => code.value(),
        Err(err) => RpcCode::from(&err).value(),
    }
}

async fn dispatch(command: Command, rpc: &dyn AgentCoordinatorRpc) -> Result<RpcCode> {
    match command {
        Command::GetWuOperationState { node_name, .. } => {
            let state = rpc.get_wu_operation_state(&node_name).await?;
            Ok(RpcCode::SubState(state.sub_state))
        }
        Command::UpdateSearchAndDownloadStatus {
            node_name,
            application_uri,
            sub_state,
            installation_timeout_minutes,
            result_file_path,
            ..
        } => {
            let sub_state = parse_sub_state(&sub_state)?;
            let result = load_result(result_file_path.as_deref())?;
            rpc.update_search_and_download_status(
                &node_name,
                &application_uri,
                sub_state,
                result,
                Duration::from_secs(installation_timeout_minutes * 60),
            )
            .await?;
            Ok(RpcCode::Success)
        }
        Command::UpdateInstallationStatus {
            node_name,
            application_uri,
            sub_state,
            result_file_path,
            ..
        } => {
            let sub_state = parse_sub_state(&sub_state)?;
            let result = load_result(result_file_path.as_deref())?;
            rpc.update_installation_status(&node_name, &application_uri, sub_state, result)
                .await?;
            Ok(RpcCode::Success)
        }
        Command::ReportHealth {
            application_uri,
            property,
            description,
            health_state,
            ttl_minutes,
            timeout_seconds,
        } => {
            let state = parse_health_state(&health_state)?;
            rpc.report_health(
                &application_uri,
                &property,
                &description,
                state,
                Duration::from_secs(ttl_minutes * 60),
                Duration::from_secs(timeout_seconds),
            )
            .await?;
            Ok(RpcCode::Success)
        }
        Command::GetApplicationDeployedStatus { application_uri, .. } => {
            rpc.get_application_deployed_status(&application_uri).await?;
            Ok(RpcCode::Success)
        }
    }
}
