//! Cluster access used by the reconciler
//!
//! Everything the state functions read from or write to the API server goes
//! through [`ClusterClient`]. [`KubeCluster`] is the production implementation.

mod events;

pub use events::{EventPublisher, KubeEventPublisher, reasons};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};

use crate::controller::error::{Error, Result};
use crate::crd::{DockerRegistry, Gateway};

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Secrets matching `label_selector` in every namespace
    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Services in every namespace
    async fn list_services(&self) -> Result<Vec<Service>>;

    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>>;

    /// DockerRegistry instances in every namespace
    async fn list_registries(&self) -> Result<Vec<DockerRegistry>>;

    /// Replace the whole object (metadata and spec). Status is ignored by the API server.
    async fn replace_registry(&self, registry: &DockerRegistry) -> Result<DockerRegistry>;

    /// Replace the status subresource. The request carries the object's
    /// `resourceVersion`, so a concurrent write surfaces as [`Error::Conflict`].
    async fn replace_registry_status(&self, registry: &DockerRegistry) -> Result<DockerRegistry>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn conflict_aware(registry: &DockerRegistry, e: kube::Error) -> Error {
    match e {
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(format!(
            "{}/{}: {}",
            registry.namespace().unwrap_or_default(),
            registry.name_any(),
            resp.message
        )),
        other => Error::KubeError(other),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_secrets(&self, label_selector: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().labels(label_selector)).await?;
        Ok(list.items)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let api: Api<Service> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await {
            Ok(gateway) => Ok(gateway),
            // Istio CRDs not installed
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_registries(&self) -> Result<Vec<DockerRegistry>> {
        let api: Api<DockerRegistry> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn replace_registry(&self, registry: &DockerRegistry) -> Result<DockerRegistry> {
        let ns = registry
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<DockerRegistry> = Api::namespaced(self.client.clone(), &ns);
        api.replace(&registry.name_any(), &PostParams::default(), registry)
            .await
            .map_err(|e| conflict_aware(registry, e))
    }

    async fn replace_registry_status(&self, registry: &DockerRegistry) -> Result<DockerRegistry> {
        let ns = registry
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<DockerRegistry> = Api::namespaced(self.client.clone(), &ns);
        let body = serde_json::to_vec(registry)?;
        api.replace_status(&registry.name_any(), &PostParams::default(), body)
            .await
            .map_err(|e| conflict_aware(registry, e))
    }
}
