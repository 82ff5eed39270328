//! The host-OS policy surface: disabling the OS's own automatic-update mechanism ahead of
//! the scheduling loop, stopping platform services ahead of a reboot, and requesting the
//! reboot (or a full machine reset) itself (§4.2 outer-loop step 4, "reboot handling", §9
//! "reset the local machine"). Out of scope for the real registry/host-API binding (§1);
//! only the trait boundary and an in-memory fake live here.

use crate::error::{CoordError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Host-OS actions the agent needs outside the update-engine surface.
#[async_trait]
pub trait OsPolicy: Send + Sync {
    /// Apply the host's "notify before download" automatic-update policy (registry or
    /// host update-settings API, depending on OS version).
    async fn disable_automatic_updates(&self) -> Result<()>;

    /// Stop the platform's own services ahead of a reboot.
    async fn stop_platform_services(&self) -> Result<()>;

    /// Request an OS restart (or, when called from the reschedule-exhaustion path, a full
    /// machine reset).
    async fn request_restart(&self) -> Result<()>;
}

/// In-memory fake recording which calls were made, for tests.
#[derive(Debug, Default)]
pub struct InMemoryOsPolicy {
    calls: Mutex<Vec<&'static str>>,
    fail_next_disable: AtomicBool,
}

impl InMemoryOsPolicy {
    /// Construct a fake with no recorded calls.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The ordered list of calls made so far.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// Force the next `disable_automatic_updates` call to fail, to exercise the agent's
    /// fixed-backoff retry (§4.2 outer-loop step 4).
    pub fn fail_next_disable_call(&self) {
        self.fail_next_disable.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OsPolicy for InMemoryOsPolicy {
    async fn disable_automatic_updates(&self) -> Result<()> {
        if self.fail_next_disable.swap(false, Ordering::SeqCst) {
            return Err(CoordError::Retryable("simulated host API failure".to_string()));
        }
        self.calls.lock().push("disable_automatic_updates");
        Ok(())
    }

    async fn stop_platform_services(&self) -> Result<()> {
        self.calls.lock().push("stop_platform_services");
        Ok(())
    }

    async fn request_restart(&self) -> Result<()> {
        self.calls.lock().push("request_restart");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let policy = InMemoryOsPolicy::new();
        policy.disable_automatic_updates().await.unwrap();
        policy.stop_platform_services().await.unwrap();
        policy.request_restart().await.unwrap();
        assert_eq!(
            policy.calls(),
            vec!["disable_automatic_updates", "stop_platform_services", "request_restart"]
        );
    }

    #[tokio::test]
    async fn fail_next_disable_call_fails_exactly_once() {
        let policy = InMemoryOsPolicy::new();
        policy.fail_next_disable_call();
        assert!(policy.disable_automatic_updates().await.is_err());
        assert!(policy.disable_automatic_updates().await.is_ok());
    }
}
