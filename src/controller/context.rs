use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterClient, EventPublisher, KubeCluster, KubeEventPublisher};
use crate::config::OperatorConfig;
use crate::controller::error::BackoffConfig;
use crate::health::HealthState;
use crate::installer::{HelmInstaller, Installer};
use crate::resolver::{PortSource, RandomPortSource};

/// Name reported on Events and used as the server-side apply field manager
pub const CONTROLLER_NAME: &str = "registry-operator";

/// Shared context for the controller
pub struct Context {
    pub cluster: Arc<dyn ClusterClient>,
    pub installer: Arc<dyn Installer>,
    pub events: Arc<dyn EventPublisher>,
    pub config: OperatorConfig,
    /// Candidate node ports when the default one is taken
    pub port_source: Arc<dyn PortSource>,
    /// Health state for recording metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
    /// Cancelled on shutdown; aborts in-flight passes
    pub cancel: CancellationToken,
    pub backoff: BackoffConfig,
    /// Consecutive failures per `namespace/name`, reset on success
    retries: Mutex<HashMap<String, u32>>,
}

impl Context {
    /// Production wiring on top of a kube client
    pub fn new(
        client: Client,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
        cancel: CancellationToken,
    ) -> Self {
        let installer = HelmInstaller::new(client.clone(), config.chart_path.clone(), config.helm_bin.clone());
        Self {
            cluster: Arc::new(KubeCluster::new(client.clone())),
            installer: Arc::new(installer),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            config,
            port_source: Arc::new(RandomPortSource),
            health_state,
            cancel,
            backoff: BackoffConfig::default(),
            retries: Mutex::new(HashMap::new()),
        }
    }

    /// Assemble a context from explicit collaborators
    pub fn from_parts(
        cluster: Arc<dyn ClusterClient>,
        installer: Arc<dyn Installer>,
        events: Arc<dyn EventPublisher>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            cluster,
            installer,
            events,
            config,
            port_source: Arc::new(RandomPortSource),
            health_state: None,
            cancel: CancellationToken::new(),
            backoff: BackoffConfig::default(),
            retries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_port_source(mut self, source: Arc<dyn PortSource>) -> Self {
        self.port_source = source;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    /// Count a failure for `key` and return the attempt number it replaces
    pub(crate) fn next_attempt(&self, key: &str) -> u32 {
        match self.retries.lock() {
            Ok(mut retries) => {
                let attempt = retries.entry(key.to_string()).or_insert(0);
                let current = *attempt;
                *attempt = attempt.saturating_add(1);
                current
            }
            Err(_) => 0,
        }
    }

    pub(crate) fn reset_attempts(&self, key: &str) {
        if let Ok(mut retries) = self.retries.lock() {
            retries.remove(key);
        }
    }
}
