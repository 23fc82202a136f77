//! In-memory collaborators for driving reconcile passes without a cluster
//!
//! [`FakeCluster`] behaves like a tiny API server: replacing a registry keeps
//! the stored status, status writes check `resourceVersion`, and removing the
//! last finalizer from an object marked for deletion deletes it.

use std::collections::{BTreeMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ObjectReference, Secret, Service};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use serde_json::Value;

use registry_operator::cluster::{ClusterClient, EventPublisher};
use registry_operator::controller::SystemState;
use registry_operator::crd::{DockerRegistry, Gateway};
use registry_operator::installer::{
    Installer, InstallerError, PostUninstallAction, PreApplyAction, Release, Verification,
};
use registry_operator::resolver::PortSource;
use registry_operator::{Context, Error, OperatorConfig, Result, reconcile};

type Key = (String, String);

fn key_of<K: ResourceExt>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn not_found(what: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{what} not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

// =============================================================================
// Cluster
// =============================================================================

#[derive(Default)]
struct ClusterData {
    secrets: BTreeMap<Key, Secret>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    gateways: BTreeMap<Key, Gateway>,
    registries: BTreeMap<Key, DockerRegistry>,
    calls: Vec<String>,
    status_conflicts: usize,
    fail_list_services: bool,
    resource_version: u64,
}

impl ClusterData {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

#[derive(Default)]
pub struct FakeCluster {
    data: Mutex<ClusterData>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, secret: Secret) -> Self {
        self.insert_secret(secret);
        self
    }

    pub fn with_service(self, service: Service) -> Self {
        self.data.lock().unwrap().services.insert(key_of(&service), service);
        self
    }

    pub fn with_gateway(self, gateway: Gateway) -> Self {
        self.data.lock().unwrap().gateways.insert(key_of(&gateway), gateway);
        self
    }

    pub fn with_deployment(self, deployment: Deployment) -> Self {
        self.data
            .lock()
            .unwrap()
            .deployments
            .insert(key_of(&deployment), deployment);
        self
    }

    pub fn with_registry(self, registry: DockerRegistry) -> Self {
        self.insert_registry(registry);
        self
    }

    pub fn insert_secret(&self, secret: Secret) {
        self.data.lock().unwrap().secrets.insert(key_of(&secret), secret);
    }

    pub fn insert_registry(&self, mut registry: DockerRegistry) {
        let mut data = self.data.lock().unwrap();
        registry.metadata.resource_version = Some(data.next_version());
        data.registries.insert(key_of(&registry), registry);
    }

    pub fn remove_registry(&self, namespace: &str, name: &str) {
        self.data.lock().unwrap().registries.remove(&key(namespace, name));
    }

    /// Reject the next `count` status writes with a conflict
    pub fn fail_status_writes(&self, count: usize) {
        self.data.lock().unwrap().status_conflicts = count;
    }

    pub fn fail_list_services(&self) {
        self.data.lock().unwrap().fail_list_services = true;
    }

    pub fn registry(&self, namespace: &str, name: &str) -> Option<DockerRegistry> {
        self.data
            .lock()
            .unwrap()
            .registries
            .get(&key(namespace, name))
            .cloned()
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.data.lock().unwrap().secrets.contains_key(&key(namespace, name))
    }

    /// Every call in order, formatted as `method namespace/name`
    pub fn calls(&self) -> Vec<String> {
        self.data.lock().unwrap().calls.clone()
    }

    /// Number of calls to `method`
    pub fn call_count(&self, method: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(method))
            .count()
    }

    fn record(&self, call: String) {
        self.data.lock().unwrap().calls.push(call);
    }
}

fn matches_selector(secret: &Secret, selector: &str) -> bool {
    let labels = secret.labels();
    selector.split(',').filter(|s| !s.is_empty()).all(|term| match term.split_once('=') {
        Some((k, v)) => labels.get(k).is_some_and(|l| l == v),
        None => labels.contains_key(term),
    })
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.record(format!("get_secret {namespace}/{name}"));
        Ok(self.data.lock().unwrap().secrets.get(&key(namespace, name)).cloned())
    }

    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>> {
        self.record(format!("list_secrets {label_selector}"));
        Ok(self
            .data
            .lock()
            .unwrap()
            .secrets
            .values()
            .filter(|s| matches_selector(s, label_selector))
            .cloned()
            .collect())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_secret {namespace}/{name}"));
        self.data.lock().unwrap().secrets.remove(&key(namespace, name));
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        self.record(format!("get_deployment {namespace}/{name}"));
        Ok(self
            .data
            .lock()
            .unwrap()
            .deployments
            .get(&key(namespace, name))
            .cloned())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.record(format!("get_service {namespace}/{name}"));
        Ok(self.data.lock().unwrap().services.get(&key(namespace, name)).cloned())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.record("list_services".to_string());
        let data = self.data.lock().unwrap();
        if data.fail_list_services {
            return Err(Error::Conflict("services unavailable".to_string()));
        }
        Ok(data.services.values().cloned().collect())
    }

    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>> {
        self.record(format!("get_gateway {namespace}/{name}"));
        Ok(self.data.lock().unwrap().gateways.get(&key(namespace, name)).cloned())
    }

    async fn list_registries(&self) -> Result<Vec<DockerRegistry>> {
        self.record("list_registries".to_string());
        Ok(self.data.lock().unwrap().registries.values().cloned().collect())
    }

    async fn replace_registry(&self, registry: &DockerRegistry) -> Result<DockerRegistry> {
        let k = key_of(registry);
        self.record(format!("replace_registry {}/{}", k.0, k.1));

        let mut data = self.data.lock().unwrap();
        let Some(current) = data.registries.get(&k).cloned() else {
            return Err(not_found(&k.1));
        };
        let mut stored = registry.clone();
        stored.status = current.status;
        stored.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
        stored.metadata.resource_version = Some(data.next_version());

        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            data.registries.remove(&k);
        } else {
            data.registries.insert(k, stored.clone());
        }
        Ok(stored)
    }

    async fn replace_registry_status(&self, registry: &DockerRegistry) -> Result<DockerRegistry> {
        let k = key_of(registry);
        self.record(format!("replace_registry_status {}/{}", k.0, k.1));

        let mut data = self.data.lock().unwrap();
        if data.status_conflicts > 0 {
            data.status_conflicts -= 1;
            return Err(Error::Conflict(format!("{}/{}", k.0, k.1)));
        }
        let Some(mut stored) = data.registries.get(&k).cloned() else {
            return Err(not_found(&k.1));
        };
        if registry.metadata.resource_version.is_some()
            && registry.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(Error::Conflict(format!("{}/{}: stale resourceVersion", k.0, k.1)));
        }
        stored.status = registry.status.clone();
        stored.metadata.resource_version = Some(data.next_version());
        data.registries.insert(k, stored.clone());
        Ok(stored)
    }
}

// =============================================================================
// Installer
// =============================================================================

#[derive(Default)]
struct InstallerData {
    installs: Vec<(Release, Value)>,
    pre_action_kinds: Vec<String>,
    verify_results: VecDeque<Verification>,
    uninstall_results: VecDeque<bool>,
    uninstalls: usize,
    orphans: Vec<String>,
    install_error: Option<String>,
    verify_error: Option<String>,
}

/// Scripted installer. Verification and uninstall answer `Ready` and `true`
/// once their scripts run out.
#[derive(Default)]
pub struct FakeInstaller {
    data: Mutex<InstallerData>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verify(self, results: impl IntoIterator<Item = Verification>) -> Self {
        self.data.lock().unwrap().verify_results.extend(results);
        self
    }

    pub fn with_uninstall(self, results: impl IntoIterator<Item = bool>) -> Self {
        self.data.lock().unwrap().uninstall_results.extend(results);
        self
    }

    pub fn with_orphans(self, orphans: &[&str]) -> Self {
        self.data.lock().unwrap().orphans = orphans.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn with_install_error(self, message: &str) -> Self {
        self.data.lock().unwrap().install_error = Some(message.to_string());
        self
    }

    pub fn with_verify_error(self, message: &str) -> Self {
        self.data.lock().unwrap().verify_error = Some(message.to_string());
        self
    }

    pub fn clear_orphans(&self) {
        self.data.lock().unwrap().orphans.clear();
    }

    pub fn install_count(&self) -> usize {
        self.data.lock().unwrap().installs.len()
    }

    pub fn uninstall_count(&self) -> usize {
        self.data.lock().unwrap().uninstalls
    }

    /// Values document of the latest install
    pub fn last_values(&self) -> Option<Value> {
        self.data.lock().unwrap().installs.last().map(|(_, v)| v.clone())
    }

    pub fn last_release(&self) -> Option<Release> {
        self.data.lock().unwrap().installs.last().map(|(r, _)| r.clone())
    }

    pub fn pre_action_kinds(&self) -> Vec<String> {
        self.data.lock().unwrap().pre_action_kinds.clone()
    }
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn install(
        &self,
        release: &Release,
        values: &Value,
        pre_actions: &[Box<dyn PreApplyAction>],
    ) -> Result<(), InstallerError> {
        let mut data = self.data.lock().unwrap();
        if let Some(message) = &data.install_error {
            return Err(InstallerError::Template(message.clone()));
        }
        data.pre_action_kinds = pre_actions.iter().map(|a| a.kind().to_string()).collect();
        data.installs.push((release.clone(), values.clone()));
        Ok(())
    }

    async fn uninstall(
        &self,
        _release: &Release,
        post_actions: &[Box<dyn PostUninstallAction>],
    ) -> Result<bool, InstallerError> {
        let scripted = {
            let mut data = self.data.lock().unwrap();
            data.uninstalls += 1;
            data.uninstall_results.pop_front().unwrap_or(true)
        };
        let mut done = scripted;
        for action in post_actions {
            done &= action.run().await?;
        }
        Ok(done)
    }

    async fn verify(&self, _release: &Release) -> Result<Verification, InstallerError> {
        let mut data = self.data.lock().unwrap();
        if let Some(message) = &data.verify_error {
            return Err(InstallerError::Action(message.clone()));
        }
        Ok(data.verify_results.pop_front().unwrap_or(Verification::Ready))
    }

    async fn check_orphan_resources(&self, _release: &Release) -> Result<Vec<String>, InstallerError> {
        Ok(self.data.lock().unwrap().orphans.clone())
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<String> {
        self.events().into_iter().filter_map(|e| e.note).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

// =============================================================================
// Node ports
// =============================================================================

/// Hands out scripted candidates, then the low end of the range
#[derive(Default)]
pub struct SequencePortSource {
    ports: Mutex<VecDeque<i32>>,
}

impl SequencePortSource {
    pub fn new(ports: impl IntoIterator<Item = i32>) -> Self {
        Self {
            ports: Mutex::new(ports.into_iter().collect()),
        }
    }
}

impl PortSource for SequencePortSource {
    fn next_port(&self, range: RangeInclusive<i32>) -> i32 {
        self.ports
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*range.start())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A [`Context`] wired to fakes, plus handles to inspect them
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub installer: Arc<FakeInstaller>,
    pub events: Arc<RecordingEventPublisher>,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new(cluster: FakeCluster) -> Self {
        Self::with_installer(cluster, FakeInstaller::new())
    }

    pub fn with_installer(cluster: FakeCluster, installer: FakeInstaller) -> Self {
        let cluster = Arc::new(cluster);
        let installer = Arc::new(installer);
        let events = Arc::new(RecordingEventPublisher::default());
        let ctx = Context::from_parts(
            cluster.clone(),
            installer.clone(),
            events.clone(),
            OperatorConfig::default(),
        )
        .with_port_source(Arc::new(SequencePortSource::default()));
        Self {
            cluster,
            installer,
            events,
            ctx: Arc::new(ctx),
        }
    }

    /// Reconcile the stored copy of `namespace/name`, as the controller would
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let registry = self
            .cluster
            .registry(namespace, name)
            .expect("registry exists in fake cluster");
        reconcile(Arc::new(registry), self.ctx.clone()).await
    }

    /// Fresh pass state for the stored copy of `namespace/name`
    pub fn system_state(&self, namespace: &str, name: &str) -> SystemState {
        let registry = self
            .cluster
            .registry(namespace, name)
            .expect("registry exists in fake cluster");
        SystemState::new(registry, &self.ctx.config, self.ctx.port_source.clone())
    }
}
