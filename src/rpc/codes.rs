//! Numeric wire/exit-code contract (§4.3.2). These values are part of the process
//! boundary between the agent and the coordinator and must never be renumbered.

use crate::error::CoordError;
use crate::types::ExecutorSubState;

/// A wire-level result code: either a success sub-state (positive) or an error
/// classification (negative), with `0` reserved for plain success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    /// The call succeeded with no sub-state payload.
    Success,
    /// A sub-state value returned by `GetWuOperationState`.
    SubState(ExecutorSubState),
    /// Unclassified fatal failure.
    Failure,
    /// `CoordError::RepairTaskInvalidState`.
    RepairTaskInvalidState,
    /// `CoordError::InvalidArgument`.
    InvalidArgument,
    /// `CoordError::ServiceNotFound`.
    ServiceNotFound,
    /// `CoordError::ProcessTerminated`.
    ProcessTerminated,
    /// `CoordError::Retryable`.
    RetryableException,
    /// `CoordError::Timeout`.
    TimeoutException,
    /// `CoordError::ApplicationNotFound`.
    ApplicationNotFound,
    /// `CoordError::DllNotFound`.
    DllNotFoundException,
}

impl RpcCode {
    /// The bit-exact integer value of this code, per §4.3.2.
    pub fn value(self) -> i32 {
        match self {
            RpcCode::Success => 0,
            RpcCode::SubState(s) => s.code(),
            RpcCode::Failure => -1,
            RpcCode::RepairTaskInvalidState => -5,
            RpcCode::InvalidArgument => -6,
            RpcCode::ServiceNotFound => -7,
            RpcCode::ProcessTerminated => -8,
            RpcCode::RetryableException => -9,
            RpcCode::TimeoutException => -10,
            RpcCode::ApplicationNotFound => -11,
            RpcCode::DllNotFoundException => -12,
        }
    }
}

impl From<&CoordError> for RpcCode {
    /// Total, non-heuristic mapping from the library's error taxonomy to the wire
    /// contract. Every `CoordError` variant has exactly one corresponding code; an
    /// unmapped variant here would be a defect (§4.3.4).
    fn from(err: &CoordError) -> Self {
        match err {
            CoordError::RepairTaskInvalidState { .. } => RpcCode::RepairTaskInvalidState,
            CoordError::InvalidArgument(_) => RpcCode::InvalidArgument,
            CoordError::ServiceNotFound(_) => RpcCode::ServiceNotFound,
            CoordError::ProcessTerminated(_) => RpcCode::ProcessTerminated,
            CoordError::Retryable(_) => RpcCode::RetryableException,
            CoordError::Timeout(_) => RpcCode::TimeoutException,
            CoordError::ApplicationNotFound(_) => RpcCode::ApplicationNotFound,
            CoordError::DllNotFound(_) => RpcCode::DllNotFoundException,
            // A lost optimistic-concurrency race is retryable from the caller's
            // perspective: re-read and try again (§5).
            CoordError::VersionConflict { .. } => RpcCode::RetryableException,
            CoordError::Config(_) | CoordError::Other(_) => RpcCode::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_substate_codes_are_bit_exact() {
        assert_eq!(RpcCode::Success.value(), 0);
        assert_eq!(RpcCode::SubState(ExecutorSubState::None).value(), 1);
        assert_eq!(
            RpcCode::SubState(ExecutorSubState::OperationAborted).value(),
            11
        );
    }

    #[test]
    fn error_codes_are_bit_exact() {
        assert_eq!(RpcCode::Failure.value(), -1);
        assert_eq!(RpcCode::RepairTaskInvalidState.value(), -5);
        assert_eq!(RpcCode::InvalidArgument.value(), -6);
        assert_eq!(RpcCode::ServiceNotFound.value(), -7);
        assert_eq!(RpcCode::ProcessTerminated.value(), -8);
        assert_eq!(RpcCode::RetryableException.value(), -9);
        assert_eq!(RpcCode::TimeoutException.value(), -10);
        assert_eq!(RpcCode::ApplicationNotFound.value(), -11);
        assert_eq!(RpcCode::DllNotFoundException.value(), -12);
    }

    #[test]
    fn version_conflict_maps_to_retryable() {
        let err = CoordError::VersionConflict {
            task_id: "POS_n1_x".into(),
            expected: 1,
            found: 2,
        };
        assert_eq!(RpcCode::from(&err), RpcCode::RetryableException);
    }
}
