//! Chart installation contract
//!
//! The reconciler never talks to helm directly. It hands a values document to
//! an [`Installer`] and polls it for readiness, which keeps the state machine
//! testable against an in-memory fake.

mod helm;
mod pvc;

pub use helm::{HelmInstaller, MANIFEST_KEY, RELEASE_LABEL, parse_manifest};
pub use pvc::{PvcSizeAdjust, parse_quantity};

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("chart rendering failed: {0}")]
    Template(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Action(String),
}

impl InstallerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            InstallerError::Kube(_) | InstallerError::Io(_) | InstallerError::Action(_) => true,
            InstallerError::Template(_)
            | InstallerError::InvalidManifest(_)
            | InstallerError::Yaml(_)
            | InstallerError::Json(_) => false,
        }
    }
}

/// Identity of one chart installation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub namespace: String,
}

impl Release {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Outcome of a readiness check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Ready,
    /// Workloads are still rolling out
    Processing,
    /// Workloads will not become ready without intervention
    Failed(String),
}

/// Adjusts a rendered object right before it is applied
pub trait PreApplyAction: Send + Sync {
    /// Kind this action applies to
    fn kind(&self) -> &str;

    /// `current` is the live object, if it exists
    fn adjust(
        &self,
        desired: &mut DynamicObject,
        current: Option<&DynamicObject>,
    ) -> Result<(), InstallerError>;
}

/// Runs after chart objects are deleted. Returns `true` once its work is complete.
#[async_trait]
pub trait PostUninstallAction: Send + Sync {
    async fn run(&self) -> Result<bool, InstallerError>;
}

#[async_trait]
pub trait Installer: Send + Sync {
    /// Render and apply the chart with `values`
    async fn install(
        &self,
        release: &Release,
        values: &Value,
        pre_actions: &[Box<dyn PreApplyAction>],
    ) -> Result<(), InstallerError>;

    /// Delete installed objects. Returns `true` when nothing is left.
    async fn uninstall(
        &self,
        release: &Release,
        post_actions: &[Box<dyn PostUninstallAction>],
    ) -> Result<bool, InstallerError>;

    async fn verify(&self, release: &Release) -> Result<Verification, InstallerError>;

    /// Objects labelled as part of the release but missing from its manifest,
    /// formatted as `Kind namespace/name`
    async fn check_orphan_resources(&self, release: &Release) -> Result<Vec<String>, InstallerError>;
}
