//! Registry chart specific value writers

use crate::crd::{StorageGcs, StoragePvc, StorageS3};
use crate::values::ValuesBuilder;

/// Name prefix for every object rendered by the chart
pub const FULLNAME_OVERRIDE: &str = "dockerregistry";

/// In-cluster port of the registry service
pub const SERVICE_PORT: i32 = 5000;

/// Secret holding the credentials for in-cluster access
pub const INTERNAL_ACCESS_SECRET: &str = "dockerregistry-config";
pub const EXTERNAL_ACCESS_SECRET: &str = "dockerregistry-config-external";

/// Label carried by every credential secret rendered by the chart,
/// including the copies propagated to other namespaces
pub const CONFIG_LABEL_KEY: &str = "dockerregistry.operator.io/config";
pub const CONFIG_LABEL_VALUE: &str = "credentials";

/// Env var of the registry container holding the HTTP secret
pub const HTTP_SECRET_ENV: &str = "REGISTRY_HTTP_SECRET";

const FILESYSTEM_ROOT: &str = "/var/lib/registry";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AzureSecrets {
    pub account_name: String,
    pub account_key: String,
    pub container: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct S3Secrets {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcsSecrets {
    pub account_key: String,
}

impl ValuesBuilder {
    pub fn with_fullname(&mut self, fullname: &str) -> &mut Self {
        self.with("fullnameOverride", fullname)
    }

    pub fn with_registry_credentials(&mut self, username: &str, password: &str) -> &mut Self {
        self.with("dockerRegistry.username", username)
            .with("dockerRegistry.password", password)
    }

    pub fn with_registry_http_secret(&mut self, http_secret: &str) -> &mut Self {
        self.with("registryHTTPSecret", http_secret)
    }

    pub fn with_service_port(&mut self, port: i32) -> &mut Self {
        self.with("service.port", port)
            .with("configData.http.addr", format!(":{port}"))
    }

    pub fn with_node_port(&mut self, node_port: i32) -> &mut Self {
        self.with("registryNodePort", node_port)
    }

    pub fn with_virtual_service(&mut self, host: &str, gateway: &str) -> &mut Self {
        self.with("virtualService.enabled", true)
            .with("virtualService.host", host)
            .with("virtualService.gateway", gateway)
    }

    pub fn with_pvc_disabled(&mut self) -> &mut Self {
        self.with("persistence.enabled", false)
    }

    pub fn with_pvc(&mut self, pvc: &StoragePvc) -> &mut Self {
        self.with("persistence.enabled", true)
            .with("persistence.existingClaim", pvc.name.as_str())
    }

    pub fn with_filesystem(&mut self) -> &mut Self {
        self.with("storage", "filesystem")
            .with("configData.storage.filesystem.rootdirectory", FILESYSTEM_ROOT)
    }

    pub fn with_azure(&mut self, secrets: &AzureSecrets) -> &mut Self {
        self.with("storage", "azure")
            .with("secrets.azure.accountName", secrets.account_name.as_str())
            .with("secrets.azure.accountKey", secrets.account_key.as_str())
            .with("secrets.azure.container", secrets.container.as_str())
    }

    pub fn with_s3(&mut self, config: &StorageS3, secrets: Option<&S3Secrets>) -> &mut Self {
        self.with("storage", "s3")
            .with("s3.bucket", config.bucket.as_str())
            .with("s3.region", config.region.as_str())
            .with("s3.encrypt", config.encrypt)
            .with("s3.secure", config.secure);

        if let Some(endpoint) = config.region_endpoint.as_deref().filter(|e| !e.is_empty()) {
            self.with("s3.regionEndpoint", endpoint);
        }
        if let Some(secrets) = secrets {
            self.with("secrets.s3.accessKey", secrets.access_key.as_str())
                .with("secrets.s3.secretKey", secrets.secret_key.as_str());
        }
        self
    }

    pub fn with_gcs(&mut self, config: &StorageGcs, secrets: Option<&GcsSecrets>) -> &mut Self {
        self.with("storage", "gcs")
            .with("gcs.bucket", config.bucket.as_str());

        if let Some(root) = config.rootdirectory.as_deref().filter(|r| !r.is_empty()) {
            self.with("gcs.rootdirectory", root);
        }
        if let Some(chunk_size) = config.chunksize.filter(|c| *c != 0) {
            self.with("gcs.chunkSize", chunk_size);
        }
        if let Some(secrets) = secrets {
            self.with("secrets.gcs.accountkey", secrets.account_key.as_str());
        }
        self
    }

    /// The registry reads this from its ConfigMap at startup, so a change must roll the pods.
    pub fn with_delete_enabled(&mut self, enabled: bool) -> &mut Self {
        self.with("configData.storage.delete.enabled", enabled)
            .with_rollme(format!("configData.storage.delete.enabled={enabled}"))
    }

    pub fn with_managed_by_label(&mut self, managed_by: &str) -> &mut Self {
        self.with(r"commonLabels.app\.kubernetes\.io/managed-by", managed_by)
    }

    pub fn with_logging(&mut self, level: &str, format: &str, access_log_disabled: bool) -> &mut Self {
        if !level.is_empty() {
            self.with("configData.log.level", level)
                .with_rollme(format!("configData.log.level={level}"));
        }
        if !format.is_empty() {
            self.with("configData.log.formatter", format)
                .with_rollme(format!("configData.log.formatter={format}"));
        }
        self.with("configData.log.accesslog.disabled", access_log_disabled)
            .with_rollme(format!("configData.log.accesslog.disabled={access_log_disabled}"))
    }
}
