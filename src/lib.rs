pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod installer;
pub mod resolver;
pub mod values;

pub use config::{ConfigError, LogFormat, OperatorConfig};
pub use controller::{BackoffConfig, Context, Error, FINALIZER, Result, error_policy, reconcile};
pub use crd::DockerRegistry;
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::Controller;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::installer::RELEASE_LABEL;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Map a chart object back to the DockerRegistry whose release rendered it
fn release_owner<K: Resource>(obj: &K) -> Option<ObjectRef<DockerRegistry>> {
    let name = obj.meta().labels.as_ref()?.get(RELEASE_LABEL)?;
    let namespace = obj.meta().namespace.as_deref()?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Run the DockerRegistry controller until the stream ends or `cancel` fires.
///
/// Watches DockerRegistry objects plus the Deployments and Services stamped with
/// the release label, so workload rollouts re-trigger verification. Deleting an
/// instance re-triggers every other instance so a duplicate can take over as
/// the served one.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
    cancel: CancellationToken,
) {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for DockerRegistry resources (scope: {})",
        scope_msg
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true);
    }

    let ctx = Arc::new(Context::new(client.clone(), config, health_state, cancel.clone()));

    let registries: Api<DockerRegistry> = scoped_api(client.clone(), namespace.as_deref());
    let deletions: Api<DockerRegistry> = scoped_api(client.clone(), namespace.as_deref());
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace.as_deref());
    let services: Api<Service> = scoped_api(client.clone(), namespace.as_deref());

    let watcher_config = WatcherConfig::default().any_semantic();
    let released_config = watcher_config.clone().labels(RELEASE_LABEL);

    let controller = Controller::new(registries, watcher_config.clone());
    let store = controller.store();

    controller
        .watches(deployments, released_config.clone(), |d| release_owner(&d))
        .watches(services, released_config, |s| release_owner(&s))
        .watches(deletions, watcher_config, move |deleted| {
            if deleted.metadata.deletion_timestamp.is_none() {
                return Vec::new();
            }
            store
                .state()
                .iter()
                .filter(|r| r.name_any() != deleted.name_any() || r.namespace() != deleted.namespace())
                .map(|r| ObjectRef::from_obj(r.as_ref()))
                .collect::<Vec<_>>()
        })
        .run(reconcile, error_policy, ctx)
        .take_until(cancel.cancelled_owned())
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events can still arrive for an object that was just deleted
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    tracing::info!("Controller stream ended");
}
