use tracing::debug;

use crate::cluster::ClusterClient;
use crate::crd::ExternalAccess;
use crate::resolver::{Memo, ResolveError};

/// Where the registry is reachable from outside the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAccess {
    pub host: String,
    /// `<namespace>/<name>` of the serving gateway
    pub gateway: String,
}

/// Split `<namespace>/<name>`
pub fn parse_gateway(gateway: &str) -> Option<(&str, &str)> {
    let (namespace, name) = gateway.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((namespace, name))
}

/// Resolves the external host and gateway of one DockerRegistry
pub struct ExternalAccessResolver {
    default_gateway: String,
    host_prefix: String,
    memo: Memo<ResolvedAccess>,
}

impl ExternalAccessResolver {
    /// `default_gateway` is used when the instance names none. Hosts derived from it
    /// get `host_prefix` as their first label.
    pub fn new(default_gateway: impl Into<String>, host_prefix: impl Into<String>) -> Self {
        Self {
            default_gateway: default_gateway.into(),
            host_prefix: host_prefix.into(),
            memo: Memo::default(),
        }
    }

    /// Prefix for a DockerRegistry named `name` in `namespace`
    pub fn host_prefix_for(name: &str, namespace: &str) -> String {
        format!("registry-{name}-{namespace}")
    }

    pub async fn resolve(
        &mut self,
        cluster: &dyn ClusterClient,
        access: &ExternalAccess,
    ) -> Result<ResolvedAccess, ResolveError> {
        if let Some(cached) = self.memo.cached() {
            return cached;
        }
        let outcome = match access.gateway.as_deref() {
            Some(gateway) => resolve_custom(cluster, gateway, access.host.as_deref()).await,
            None => self.resolve_default(cluster, access.host.as_deref()).await,
        };
        self.memo.store(outcome)
    }

    async fn resolve_default(
        &self,
        cluster: &dyn ClusterClient,
        custom_host: Option<&str>,
    ) -> Result<ResolvedAccess, ResolveError> {
        let (namespace, name) = parse_gateway(&self.default_gateway).ok_or_else(|| {
            ResolveError::Invalid(format!(
                "default gateway '{}' is in wrong format",
                self.default_gateway
            ))
        })?;

        let gateway = cluster
            .get_gateway(namespace, name)
            .await
            .map_err(|e| ResolveError::Cluster(format!("while getting gateway {namespace}/{name}: {e}")))?
            .ok_or_else(|| {
                ResolveError::Unavailable(format!(
                    ".spec.externalAccess.enabled is true but the {name} Gateway in the {namespace} namespace is not found"
                ))
            })?;

        let address = gateway
            .first_host()
            .map(|h| h.strip_prefix("*.").unwrap_or(h).to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                ResolveError::Unavailable(format!(
                    "the {name} Gateway in the {namespace} namespace does not have any hosts defined"
                ))
            })?;

        let host = match custom_host.filter(|h| !h.is_empty()) {
            Some(host) => host.to_string(),
            None => format!("{}.{address}", self.host_prefix),
        };
        debug!(host = %host, gateway = %self.default_gateway, "resolved external access");

        Ok(ResolvedAccess {
            host,
            gateway: self.default_gateway.clone(),
        })
    }
}

async fn resolve_custom(
    cluster: &dyn ClusterClient,
    gateway: &str,
    host: Option<&str>,
) -> Result<ResolvedAccess, ResolveError> {
    let Some(host) = host.filter(|h| !h.is_empty()) else {
        return Err(ResolveError::Invalid(
            "failed to resolve custom gateway because host is empty".to_string(),
        ));
    };
    let (namespace, name) = parse_gateway(gateway)
        .ok_or_else(|| ResolveError::Invalid(format!("gateway '{gateway}' is in wrong format")))?;

    let found = cluster
        .get_gateway(namespace, name)
        .await
        .map_err(|e| ResolveError::Cluster(format!("while getting gateway {gateway}: {e}")))?;
    if found.is_none() {
        return Err(ResolveError::Unavailable(format!("gateway '{gateway}' not found")));
    }

    Ok(ResolvedAccess {
        host: host.to_string(),
        gateway: gateway.to_string(),
    })
}
