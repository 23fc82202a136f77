//! Post-uninstall cleanup of objects the chart does not own directly

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::cluster::ClusterClient;
use crate::installer::{InstallerError, PostUninstallAction};
use crate::values::{CONFIG_LABEL_KEY, CONFIG_LABEL_VALUE};

/// Deletes credential Secrets propagated to other namespaces.
///
/// Copies may carry finalizers of the propagating controller, so deletion is
/// asynchronous. The action reports done only once a listing comes back empty.
pub struct RemoveLabeledSecrets {
    cluster: Arc<dyn ClusterClient>,
    selector: String,
}

impl RemoveLabeledSecrets {
    pub fn new(cluster: Arc<dyn ClusterClient>, selector: impl Into<String>) -> Self {
        Self {
            cluster,
            selector: selector.into(),
        }
    }

    /// Credential secrets rendered by the registry chart
    pub fn credentials(cluster: Arc<dyn ClusterClient>) -> Self {
        Self::new(cluster, format!("{CONFIG_LABEL_KEY}={CONFIG_LABEL_VALUE}"))
    }
}

#[async_trait]
impl PostUninstallAction for RemoveLabeledSecrets {
    async fn run(&self) -> Result<bool, InstallerError> {
        let secrets = self
            .cluster
            .list_secrets(&self.selector)
            .await
            .map_err(|e| InstallerError::Action(format!("while listing secrets: {e}")))?;
        if secrets.is_empty() {
            return Ok(true);
        }

        for secret in &secrets {
            let namespace = secret.namespace().unwrap_or_default();
            let name = secret.name_any();
            self.cluster
                .delete_secret(&namespace, &name)
                .await
                .map_err(|e| InstallerError::Action(format!("while deleting secret {namespace}/{name}: {e}")))?;
            debug!(namespace = %namespace, name = %name, "deleted credential secret");
        }
        info!(count = secrets.len(), selector = %self.selector, "waiting for credential secrets to be removed");
        Ok(false)
    }
}
