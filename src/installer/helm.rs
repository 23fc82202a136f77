//! Installer backed by `helm template` and server-side apply
//!
//! Rendering is delegated to the helm binary. The rendered objects are applied
//! with server-side apply and the rendered manifest is cached in a Secret so
//! that verification, orphan detection and uninstall work from the same
//! object list the last install produced.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, ObjectMeta,
    Patch, PatchParams,
};
use kube::discovery::{ApiCapabilities, Scope, pinned_kind};
use kube::{Client, ResourceExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::installer::{
    Installer, InstallerError, PostUninstallAction, PreApplyAction, Release, Verification,
};

/// Label stamped on every applied object
pub const RELEASE_LABEL: &str = "operator.dockerregistry.io/release";

/// Key of the rendered manifest inside the cache Secret
pub const MANIFEST_KEY: &str = "manifest";

const FIELD_MANAGER: &str = "registry-operator";

pub struct HelmInstaller {
    client: Client,
    chart_path: PathBuf,
    helm_bin: String,
}

impl HelmInstaller {
    pub fn new(client: Client, chart_path: impl Into<PathBuf>, helm_bin: impl Into<String>) -> Self {
        Self {
            client,
            chart_path: chart_path.into(),
            helm_bin: helm_bin.into(),
        }
    }

    /// Run `helm template` with `values` on stdin
    async fn render(&self, release: &Release, values: &Value) -> Result<String, InstallerError> {
        let mut child = Command::new(&self.helm_bin)
            .arg("template")
            .arg(&release.name)
            .arg(&self.chart_path)
            .args(["--namespace", release.namespace.as_str(), "--values", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&serde_json::to_vec(values)?).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(InstallerError::Template(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn cache_name(release: &Release) -> String {
        format!("{}-manifest", release.name)
    }

    async fn load_manifest(&self, release: &Release) -> Result<Option<String>, InstallerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &release.namespace);
        let Some(secret) = api.get_opt(&Self::cache_name(release)).await? else {
            return Ok(None);
        };
        Ok(secret
            .data
            .and_then(|d| d.get(MANIFEST_KEY).cloned())
            .map(|b| String::from_utf8_lossy(&b.0).into_owned()))
    }

    async fn store_manifest(&self, release: &Release, manifest: &str) -> Result<(), InstallerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &release.namespace);
        let name = Self::cache_name(release);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(release.namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                MANIFEST_KEY.to_string(),
                ByteString(manifest.as_bytes().to_vec()),
            )])),
            ..Default::default()
        };
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&secret))
            .await?;
        Ok(())
    }

    async fn delete_manifest(&self, release: &Release) -> Result<(), InstallerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &release.namespace);
        match api.delete(&Self::cache_name(release), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Api handle for `obj`, defaulting its namespace to the release namespace
    fn api_for(
        &self,
        release: &Release,
        obj: &mut DynamicObject,
        ar: &ApiResource,
        caps: &ApiCapabilities,
    ) -> Api<DynamicObject> {
        match caps.scope {
            Scope::Namespaced => {
                let ns = obj
                    .metadata
                    .namespace
                    .get_or_insert_with(|| release.namespace.clone())
                    .clone();
                Api::namespaced_with(self.client.clone(), &ns, ar)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), ar),
        }
    }

    async fn resolve(
        &self,
        cache: &mut HashMap<String, (ApiResource, ApiCapabilities)>,
        obj: &DynamicObject,
    ) -> Result<(ApiResource, ApiCapabilities), InstallerError> {
        let gvk = gvk_of(obj)?;
        let key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        if let Some(found) = cache.get(&key) {
            return Ok(found.clone());
        }
        let found = pinned_kind(&self.client, &gvk).await?;
        cache.insert(key, found.clone());
        Ok(found)
    }

    async fn manifest_objects(&self, release: &Release) -> Result<Vec<DynamicObject>, InstallerError> {
        match self.load_manifest(release).await? {
            Some(manifest) => parse_manifest(&manifest),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Installer for HelmInstaller {
    #[instrument(skip(self, values, pre_actions), fields(release = %release.name, namespace = %release.namespace))]
    async fn install(
        &self,
        release: &Release,
        values: &Value,
        pre_actions: &[Box<dyn PreApplyAction>],
    ) -> Result<(), InstallerError> {
        let manifest = self.render(release, values).await?;
        let objects = parse_manifest(&manifest)?;
        let mut resources = HashMap::new();

        for mut obj in objects {
            let (ar, caps) = self.resolve(&mut resources, &obj).await?;
            let api = self.api_for(release, &mut obj, &ar, &caps);
            obj.labels_mut()
                .insert(RELEASE_LABEL.to_string(), release.name.clone());

            let name = obj.name_any();
            let matching: Vec<_> = pre_actions.iter().filter(|a| a.kind() == ar.kind).collect();
            if !matching.is_empty() {
                let current = api.get_opt(&name).await?;
                for action in matching {
                    action.adjust(&mut obj, current.as_ref())?;
                }
            }

            api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&obj))
                .await?;
            debug!(kind = %ar.kind, name = %name, "applied");
        }

        self.store_manifest(release, &manifest).await?;
        info!("chart applied");
        Ok(())
    }

    #[instrument(skip(self, post_actions), fields(release = %release.name, namespace = %release.namespace))]
    async fn uninstall(
        &self,
        release: &Release,
        post_actions: &[Box<dyn PostUninstallAction>],
    ) -> Result<bool, InstallerError> {
        let objects = self.manifest_objects(release).await?;
        let mut resources = HashMap::new();
        let mut remaining = 0usize;

        for mut obj in objects.into_iter().rev() {
            let (ar, caps) = self.resolve(&mut resources, &obj).await?;
            let api = self.api_for(release, &mut obj, &ar, &caps);
            let name = obj.name_any();

            match api.delete(&name, &DeleteParams::background()).await {
                Ok(either) => {
                    if either.is_left() {
                        remaining += 1;
                    }
                }
                Err(kube::Error::Api(resp)) if resp.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut done = remaining == 0;
        for action in post_actions {
            done &= action.run().await?;
        }

        if done {
            self.delete_manifest(release).await?;
            info!("chart uninstalled");
        } else {
            debug!(remaining, "waiting for objects to be removed");
        }
        Ok(done)
    }

    #[instrument(skip(self), fields(release = %release.name, namespace = %release.namespace))]
    async fn verify(&self, release: &Release) -> Result<Verification, InstallerError> {
        let objects = self.manifest_objects(release).await?;

        for obj in objects.iter().filter(|o| kind_of(o) == Some("Deployment")) {
            let ns = obj
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| release.namespace.clone());
            let api: Api<Deployment> = Api::namespaced(self.client.clone(), &ns);
            let Some(deployment) = api.get_opt(&obj.name_any()).await? else {
                return Ok(Verification::Processing);
            };
            match deployment_verification(&deployment) {
                Verification::Ready => continue,
                other => return Ok(other),
            }
        }
        Ok(Verification::Ready)
    }

    #[instrument(skip(self), fields(release = %release.name, namespace = %release.namespace))]
    async fn check_orphan_resources(&self, release: &Release) -> Result<Vec<String>, InstallerError> {
        let objects = self.manifest_objects(release).await?;
        let mut expected = HashSet::new();
        let mut resources = HashMap::new();
        for mut obj in objects {
            let (ar, caps) = self.resolve(&mut resources, &obj).await?;
            // resolves the default namespace
            let _ = self.api_for(release, &mut obj, &ar, &caps);
            expected.insert(object_id(&ar.kind, &obj));
        }

        let selector = format!("{RELEASE_LABEL}={}", release.name);
        let mut orphans = Vec::new();
        for (ar, _) in resources.values() {
            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), ar);
            let listed = api.list(&ListParams::default().labels(&selector)).await?;
            for item in listed.items {
                let id = object_id(&ar.kind, &item);
                if !expected.contains(&id) {
                    warn!(object = %id, "orphaned release object");
                    orphans.push(id);
                }
            }
        }
        orphans.sort();
        Ok(orphans)
    }
}

/// Split a multi-document YAML stream into objects, skipping empty documents
pub fn parse_manifest(manifest: &str) -> Result<Vec<DynamicObject>, InstallerError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let obj: DynamicObject = serde_yaml::from_value(value)?;
        if obj.types.is_none() {
            return Err(InstallerError::InvalidManifest(format!(
                "object '{}' has no apiVersion/kind",
                obj.name_any()
            )));
        }
        objects.push(obj);
    }
    Ok(objects)
}

fn kind_of(obj: &DynamicObject) -> Option<&str> {
    obj.types.as_ref().map(|t| t.kind.as_str())
}

fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, InstallerError> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| InstallerError::InvalidManifest("missing apiVersion/kind".into()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

fn object_id(kind: &str, obj: &DynamicObject) -> String {
    match obj.metadata.namespace.as_deref() {
        Some(ns) => format!("{kind} {ns}/{}", obj.name_any()),
        None => format!("{kind} {}", obj.name_any()),
    }
}

/// Readiness of a single Deployment
pub fn deployment_verification(deployment: &Deployment) -> Verification {
    let name = deployment.name_any();
    let Some(status) = deployment.status.as_ref() else {
        return Verification::Processing;
    };

    for condition in status.conditions.iter().flatten() {
        if condition.type_ == "ReplicaFailure" && condition.status == "True" {
            return Verification::Failed(format!(
                "deployment {name} has replica failure: {}",
                condition.message.clone().unwrap_or_default()
            ));
        }
        if condition.type_ == "Progressing"
            && condition.reason.as_deref() == Some("ProgressDeadlineExceeded")
        {
            return Verification::Failed(format!(
                "deployment {name} exceeded its progress deadline"
            ));
        }
    }

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let generation_observed = match (deployment.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => false,
    };

    if generation_observed
        && status.updated_replicas.unwrap_or(0) >= desired
        && status.available_replicas.unwrap_or(0) >= desired
    {
        Verification::Ready
    } else {
        Verification::Processing
    }
}
