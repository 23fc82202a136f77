use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::cluster::ClusterClient;
use crate::resolver::{Memo, ResolveError};
use crate::values::FULLNAME_OVERRIDE;

/// Port tried first for a new installation
pub const DEFAULT_NODE_PORT: i32 = 32_137;
pub const MIN_NODE_PORT: i32 = 30_000;
pub const MAX_NODE_PORT: i32 = 32_767;

const MAX_ATTEMPTS: usize = 100;

/// Source of candidate node ports
pub trait PortSource: Send + Sync {
    fn next_port(&self, range: RangeInclusive<i32>) -> i32;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomPortSource;

impl PortSource for RandomPortSource {
    fn next_port(&self, range: RangeInclusive<i32>) -> i32 {
        rand::rng().random_range(range)
    }
}

/// Picks the node port the registry service is exposed on
pub struct NodePortResolver {
    source: Arc<dyn PortSource>,
    memo: Memo<i32>,
}

impl NodePortResolver {
    pub fn new(source: Arc<dyn PortSource>) -> Self {
        Self {
            source,
            memo: Memo::default(),
        }
    }

    pub async fn resolve(
        &mut self,
        cluster: &dyn ClusterClient,
        namespace: &str,
    ) -> Result<i32, ResolveError> {
        if let Some(cached) = self.memo.cached() {
            return cached;
        }
        let outcome = self.lookup(cluster, namespace).await;
        self.memo.store(outcome)
    }

    async fn lookup(&self, cluster: &dyn ClusterClient, namespace: &str) -> Result<i32, ResolveError> {
        let current = cluster
            .get_service(namespace, FULLNAME_OVERRIDE)
            .await
            .map_err(|e| ResolveError::Cluster(format!("while reading registry service: {e}")))?;

        if let Some(port) = current
            .as_ref()
            .and_then(|svc| svc.spec.as_ref())
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.iter().find_map(|p| p.node_port))
        {
            debug!(port, "reusing node port of existing registry service");
            return Ok(port);
        }

        let services = cluster
            .list_services()
            .await
            .map_err(|e| ResolveError::Cluster(format!("while listing services: {e}")))?;
        let used: HashSet<i32> = services
            .iter()
            .filter_map(|svc| svc.spec.as_ref())
            .filter_map(|spec| spec.ports.as_ref())
            .flatten()
            .filter_map(|p| p.node_port)
            .collect();

        if !used.contains(&DEFAULT_NODE_PORT) {
            return Ok(DEFAULT_NODE_PORT);
        }

        for _ in 0..MAX_ATTEMPTS {
            let candidate = self.source.next_port(MIN_NODE_PORT..=MAX_NODE_PORT);
            if !used.contains(&candidate) {
                debug!(port = candidate, "allocated node port");
                return Ok(candidate);
            }
        }

        Err(ResolveError::Unavailable(format!(
            "no free node port found after {MAX_ATTEMPTS} attempts"
        )))
    }
}
