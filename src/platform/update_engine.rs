//! The external OS-update surface: search, EULA acceptance, download, install, abort
//! (§1 "out of scope: the actual OS-update library"; only the trait boundary is in scope).

use crate::error::Result;
use crate::types::{OperationOutcome, UpdateDetail};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A candidate update discovered by a search, before download/install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCandidate {
    /// Engine-assigned update identifier.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Human-readable description.
    pub description: String,
    /// The full ancestor chain of category GUIDs, from this update's immediate category up
    /// to the root (§4.2: "walking `Parent` pointers to the root"). The update engine is
    /// responsible for resolving this chain; this crate only intersects it against the
    /// configured whitelist.
    pub category_path: Vec<String>,
    /// Whether this update's EULA has already been accepted.
    pub eula_accepted: bool,
    /// Whether installing this update will require a reboot.
    pub requires_reboot: bool,
}

impl UpdateCandidate {
    /// Whether this update is eligible under `whitelist` (empty whitelist means
    /// "no filtering", per §4.2).
    pub fn matches_category_whitelist(&self, whitelist: &[String]) -> bool {
        whitelist.is_empty()
            || self.category_path.iter().any(|cat| whitelist.contains(cat))
    }
}

/// The external update engine's search/download/install/abort surface.
#[async_trait]
pub trait UpdateEngine: Send + Sync {
    /// Search for updates matching `query`. Empty result means "nothing to do".
    async fn search(&self, query: &str) -> Result<Vec<UpdateCandidate>>;

    /// Accept the EULA for a single update.
    async fn accept_eula(&self, update_id: &str) -> Result<()>;

    /// Download the given updates, returning a per-update result.
    async fn download(&self, updates: &[UpdateCandidate]) -> Result<Vec<UpdateDetail>>;

    /// Install the given updates within `budget` wall-clock time. Returns the overall
    /// outcome, per-update detail, and whether any installed update requires a reboot.
    async fn install(
        &self,
        updates: &[UpdateCandidate],
        budget: Duration,
    ) -> Result<(OperationOutcome, Vec<UpdateDetail>, bool)>;

    /// Cooperatively abort an in-flight install (§5 "Cancellation").
    async fn request_abort(&self) -> Result<()>;
}

/// Scriptable in-memory reference implementation of [`UpdateEngine`], for tests and for
/// running the coordinator/agent without a real OS-update binding.
#[derive(Debug, Default)]
pub struct FakeUpdateEngine {
    state: Mutex<FakeUpdateEngineState>,
}

#[derive(Debug, Default)]
struct FakeUpdateEngineState {
    available_updates: Vec<UpdateCandidate>,
    install_outcome: Option<OperationOutcome>,
    abort_requested: bool,
}

impl FakeUpdateEngine {
    /// Construct an engine with no updates available.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the updates a subsequent `search` call will return.
    pub fn set_available_updates(&self, updates: Vec<UpdateCandidate>) {
        self.state.lock().available_updates = updates;
    }

    /// Force the outcome a subsequent `install` call will report. Defaults to `Succeeded`.
    pub fn set_install_outcome(&self, outcome: OperationOutcome) {
        self.state.lock().install_outcome = Some(outcome);
    }

    /// Whether `request_abort` has been called.
    pub fn abort_requested(&self) -> bool {
        self.state.lock().abort_requested
    }
}

#[async_trait]
impl UpdateEngine for FakeUpdateEngine {
    async fn search(&self, _query: &str) -> Result<Vec<UpdateCandidate>> {
        Ok(self.state.lock().available_updates.clone())
    }

    async fn accept_eula(&self, _update_id: &str) -> Result<()> {
        Ok(())
    }

    async fn download(&self, updates: &[UpdateCandidate]) -> Result<Vec<UpdateDetail>> {
        Ok(updates
            .iter()
            .map(|u| UpdateDetail {
                update_id: u.id.clone(),
                title: u.title.clone(),
                description: u.description.clone(),
                result_code: crate::types::UpdateResultCode::Succeeded,
                hresult: 0,
            })
            .collect())
    }

    async fn install(
        &self,
        updates: &[UpdateCandidate],
        budget: Duration,
    ) -> Result<(OperationOutcome, Vec<UpdateDetail>, bool)> {
        if budget.is_zero() {
            return Ok((OperationOutcome::AbortedWithTimeout, Vec::new(), false));
        }
        let outcome = self
            .state
            .lock()
            .install_outcome
            .unwrap_or(OperationOutcome::Succeeded);
        let reboot_required = updates.iter().any(|u| u.requires_reboot);
        let details = updates
            .iter()
            .map(|u| UpdateDetail {
                update_id: u.id.clone(),
                title: u.title.clone(),
                description: u.description.clone(),
                result_code: if outcome.avoids_reschedule() {
                    crate::types::UpdateResultCode::Succeeded
                } else {
                    crate::types::UpdateResultCode::Failed
                },
                hresult: 0,
            })
            .collect();
        Ok((outcome, details, reboot_required))
    }

    async fn request_abort(&self) -> Result<()> {
        self.state.lock().abort_requested = true;
        Ok(())
    }
}
