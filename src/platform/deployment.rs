//! Application deployment status (§4.3.1 op 6, `GetApplicationDeployedStatus`).

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::Arc;

/// Whether the agent's own application is still deployed on this host. The agent uses
/// this to detect it should tear itself down (§4.2 step a).
#[async_trait]
pub trait DeploymentDirectory: Send + Sync {
    /// Whether `application_uri` is currently deployed.
    async fn is_deployed(&self, application_uri: &str) -> Result<bool>;
}

/// In-memory reference implementation of [`DeploymentDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryDeploymentDirectory {
    deployed: DashSet<String>,
}

impl InMemoryDeploymentDirectory {
    /// Construct a directory where every URI in `deployed` is considered deployed.
    pub fn new(deployed: impl IntoIterator<Item = String>) -> Arc<Self> {
        let set = DashSet::new();
        for uri in deployed {
            set.insert(uri);
        }
        Arc::new(Self { deployed: set })
    }

    /// Mark an application as undeployed, e.g. to simulate uninstallation.
    pub fn undeploy(&self, application_uri: &str) {
        self.deployed.remove(application_uri);
    }
}

#[async_trait]
impl DeploymentDirectory for InMemoryDeploymentDirectory {
    async fn is_deployed(&self, application_uri: &str) -> Result<bool> {
        Ok(self.deployed.contains(application_uri))
    }
}
