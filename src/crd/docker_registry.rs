use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DockerRegistry is the Schema for the dockerregistries API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "operator.dockerregistry.io",
    version = "v1alpha1",
    kind = "DockerRegistry",
    plural = "dockerregistries",
    shortname = "dr",
    namespaced,
    status = "DockerRegistryStatus",
    printcolumn = r#"{"name":"Configured", "type":"string", "jsonPath":".status.conditions[?(@.type=='Configured')].status"}"#,
    printcolumn = r#"{"name":"Installed", "type":"string", "jsonPath":".status.conditions[?(@.type=='Installed')].status"}"#,
    printcolumn = r#"{"name":"Generation", "type":"integer", "jsonPath":".metadata.generation"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DockerRegistrySpec {
    /// Storage backend for registry blobs. Filesystem when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,

    /// Exposure of the registry through an Istio gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_access: Option<ExternalAccess>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Logging>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccess {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Gateway in `<namespace>/<name>` form. The default ingress gateway when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// External host name. Required with a custom gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl ExternalAccess {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

/// Storage backend selection. At most one backend may be set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<StorageAzure>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<StorageS3>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<StorageGcs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btp_object_store: Option<StorageBtpObjectStore>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<StoragePvc>,

    /// Allow deleting images from the registry
    #[serde(default)]
    pub delete_enabled: bool,
}

impl Storage {
    /// Names of the backends set on this spec, in declaration order
    pub fn selected_backends(&self) -> Vec<&'static str> {
        let mut selected = Vec::new();
        if self.azure.is_some() {
            selected.push("azure");
        }
        if self.s3.is_some() {
            selected.push("s3");
        }
        if self.gcs.is_some() {
            selected.push("gcs");
        }
        if self.btp_object_store.is_some() {
            selected.push("btpObjectStore");
        }
        if self.pvc.is_some() {
            selected.push("pvc");
        }
        selected
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageAzure {
    /// Secret with `accountName`, `accountKey` and `container` keys
    pub secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageS3 {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_endpoint: Option<String>,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub secure: bool,
    /// Secret with `accessKey` and `secretKey` keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageGcs {
    pub bucket: String,
    /// Secret with an `accountkey` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootdirectory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunksize: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageBtpObjectStore {
    /// Service binding secret of a BTP object store instance
    pub secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoragePvc {
    /// Name of an existing PersistentVolumeClaim in the instance namespace
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Logging {
    /// Registry log level (debug, info, warn, error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// `json`, `text` or `console`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub access_log_disabled: bool,
}

/// Lifecycle state reported in `status.state`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Hash)]
pub enum State {
    #[default]
    Processing,
    Ready,
    Warning,
    Error,
    Deleting,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Processing,
        State::Ready,
        State::Warning,
        State::Error,
        State::Deleting,
    ];
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Processing => write!(f, "Processing"),
            State::Ready => write!(f, "Ready"),
            State::Warning => write!(f, "Warning"),
            State::Error => write!(f, "Error"),
            State::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Whether this instance is the one the operator manages
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum Served {
    True,
    False,
}

/// Registry endpoint information
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAccess {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub enabled: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub push_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pull_address: String,
    /// Only set for external access
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
}

/// Status of the DockerRegistry
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DockerRegistryStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served: Option<Served>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub internal_access: NetworkAccess,

    #[serde(default)]
    pub external_access: NetworkAccess,

    /// Storage backend tag (filesystem, azure, s3, gcs, pvc, btp-objectstore-<provider>)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pvc: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delete_enabled: String,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Reason for the condition's last transition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl DockerRegistry {
    pub fn external_access_enabled(&self) -> bool {
        self.spec
            .external_access
            .as_ref()
            .is_some_and(ExternalAccess::is_enabled)
    }

    pub fn state(&self) -> Option<State> {
        self.status.as_ref().and_then(|s| s.state)
    }
}
