//! Error types shared across the coordinator, the agent, and the RPC boundary.

use thiserror::Error;

/// The crate-wide error type.
///
/// Variants mirror the numeric RPC contract (`crate::rpc::codes::RpcCode`) one-to-one so the
/// CLI/RPC edge can translate any internal failure into the documented wire code without a
/// fallback heuristic. Library code should never need to construct a raw integer error code
/// directly; it returns one of these variants and lets `RpcCode::from` do the mapping.
#[derive(Error, Debug)]
pub enum CoordError {
    /// The repair task observed for a node is not one the state machine expects.
    #[error("repair task in unexpected state for node {node}: {state}")]
    RepairTaskInvalidState {
        /// Node whose task was in an unexpected state.
        node: String,
        /// Human-readable description of the state observed.
        state: String,
    },

    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A named platform service could not be found (e.g. health-bus target).
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The external process performing an operation was terminated before completion.
    #[error("process terminated: {0}")]
    ProcessTerminated(String),

    /// A transient failure that should be retried by the caller (registry throttling, leader
    /// change, RPC timeout at the platform boundary, lost optimistic-concurrency race).
    #[error("retryable error: {0}")]
    Retryable(String),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The named application is not deployed on this host.
    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    /// A required OS/native library was not found; the process should self-exit so the host
    /// restarts it against a refreshed environment.
    #[error("required library not found: {0}")]
    DllNotFound(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A repair task's optimistic-concurrency version did not match on write-back.
    #[error("version conflict writing task {task_id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Task whose write-back lost the race.
        task_id: String,
        /// The version the caller supplied.
        expected: u64,
        /// The version actually stored.
        found: u64,
    },

    /// Catch-all for conditions that don't map to a more specific variant above.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for CoordError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            WouldBlock | Interrupted | TimedOut => CoordError::Retryable(err.to_string()),
            _ => CoordError::Other(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        CoordError::Config(format!("json: {err}"))
    }
}

impl From<quick_xml::DeError> for CoordError {
    fn from(err: quick_xml::DeError) -> Self {
        CoordError::Config(format!("xml: {err}"))
    }
}

impl From<quick_xml::SeError> for CoordError {
    fn from(err: quick_xml::SeError) -> Self {
        CoordError::Config(format!("xml: {err}"))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoordError>;
