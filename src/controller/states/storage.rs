use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{StateId, Step};
use crate::controller::states::{configuration_failed, fetch_secret, required_key, secret_value};
use crate::controller::system_state::SystemState;
use crate::controller::validation::validate_storage;
use crate::crd::{Storage, StorageGcs, StorageS3};
use crate::values::{AzureSecrets, GcsSecrets, S3Secrets};

const FILESYSTEM: &str = "filesystem";
const BTP_OBJECT_STORE: &str = "btp-objectstore";

/// Cloud provider behind a BTP object store binding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BtpHyperscaler {
    Aws,
    Azure,
    Gcp,
}

impl BtpHyperscaler {
    pub fn as_str(self) -> &'static str {
        match self {
            BtpHyperscaler::Aws => "aws",
            BtpHyperscaler::Azure => "azure",
            BtpHyperscaler::Gcp => "gcp",
        }
    }
}

/// Identify the provider from the keys of a service binding secret
pub fn detect_hyperscaler(secret: &Secret) -> Option<BtpHyperscaler> {
    let present = |key: &str| secret_value(secret, key).is_some_and(|v| !v.is_empty());
    if present("host") {
        Some(BtpHyperscaler::Aws)
    } else if present("sas_token") {
        Some(BtpHyperscaler::Azure)
    } else if present("base64EncodedPrivateKeyData") {
        Some(BtpHyperscaler::Gcp)
    } else {
        None
    }
}

pub(super) async fn storage_configuration(ctx: &Context, state: &mut SystemState) -> Step {
    match configure_storage(ctx, state).await {
        Ok(tag) => {
            debug!(storage = %tag, "storage configured");
            state.storage_tag = Some(tag);
            Step::Next(StateId::ConfigurationStatus)
        }
        Err(e) => configuration_failed(state, e),
    }
}

/// Record storage values and return the tag reported in `status.storage`
async fn configure_storage(ctx: &Context, state: &mut SystemState) -> Result<String> {
    let Some(storage) = state.instance.spec.storage.clone() else {
        state.values.with_filesystem();
        return Ok(FILESYSTEM.to_string());
    };
    // before any secret is read
    validate_storage(&storage)?;

    let namespace = state.namespace();
    state.values.with_delete_enabled(storage.delete_enabled);

    if let Some(pvc) = &storage.pvc {
        state.values.with_pvc(pvc).with_filesystem();
        return Ok("pvc".to_string());
    }
    if storage.selected_backends().is_empty() {
        state.values.with_filesystem();
        return Ok(FILESYSTEM.to_string());
    }

    state.values.with_pvc_disabled();
    configure_object_storage(ctx, state, &namespace, &storage).await
}

async fn configure_object_storage(
    ctx: &Context,
    state: &mut SystemState,
    namespace: &str,
    storage: &Storage,
) -> Result<String> {
    if let Some(azure) = &storage.azure {
        let secret = fetch_secret(ctx, namespace, &azure.secret_name).await?;
        let secrets = AzureSecrets {
            account_name: required_key(&secret, &azure.secret_name, "accountName")?,
            account_key: required_key(&secret, &azure.secret_name, "accountKey")?,
            container: required_key(&secret, &azure.secret_name, "container")?,
        };
        state.values.with_azure(&secrets);
        return Ok("azure".to_string());
    }

    if let Some(s3) = &storage.s3 {
        let secrets = match s3.secret_name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => {
                let secret = fetch_secret(ctx, namespace, name).await?;
                Some(S3Secrets {
                    access_key: required_key(&secret, name, "accessKey")?,
                    secret_key: required_key(&secret, name, "secretKey")?,
                })
            }
            None => None,
        };
        state.values.with_s3(s3, secrets.as_ref());
        return Ok("s3".to_string());
    }

    if let Some(gcs) = &storage.gcs {
        let secrets = match gcs.secret_name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => {
                let secret = fetch_secret(ctx, namespace, name).await?;
                Some(GcsSecrets {
                    account_key: required_key(&secret, name, "accountkey")?,
                })
            }
            None => None,
        };
        state.values.with_gcs(gcs, secrets.as_ref());
        return Ok("gcs".to_string());
    }

    if let Some(btp) = &storage.btp_object_store {
        let secret = fetch_secret(ctx, namespace, &btp.secret_name).await?;
        let provider = configure_btp(state, &secret, &btp.secret_name)?;
        return Ok(format!("{BTP_OBJECT_STORE}-{}", provider.as_str()));
    }

    Err(Error::ValidationError("no storage backend selected".to_string()))
}

fn configure_btp(state: &mut SystemState, secret: &Secret, name: &str) -> Result<BtpHyperscaler> {
    let provider = detect_hyperscaler(secret).ok_or_else(|| {
        Error::ValidationError(format!(
            "secret {name} does not describe a known object store provider"
        ))
    })?;

    match provider {
        BtpHyperscaler::Aws => {
            let config = StorageS3 {
                bucket: required_key(secret, name, "bucket")?,
                region: required_key(secret, name, "region")?,
                ..Default::default()
            };
            let secrets = S3Secrets {
                access_key: required_key(secret, name, "access_key_id")?,
                secret_key: required_key(secret, name, "secret_access_key")?,
            };
            state.values.with_s3(&config, Some(&secrets));
        }
        BtpHyperscaler::Azure => {
            let secrets = AzureSecrets {
                account_name: required_key(secret, name, "account_name")?,
                account_key: required_key(secret, name, "sas_token")?,
                container: required_key(secret, name, "container_name")?,
            };
            state.values.with_azure(&secrets);
        }
        BtpHyperscaler::Gcp => {
            let config = StorageGcs {
                bucket: required_key(secret, name, "bucket")?,
                ..Default::default()
            };
            let encoded = required_key(secret, name, "base64EncodedPrivateKeyData")?;
            let decoded = STANDARD.decode(encoded.trim()).map_err(|e| {
                Error::ValidationError(format!("while decoding GCP private key from {name}: {e}"))
            })?;
            let secrets = GcsSecrets {
                account_key: String::from_utf8_lossy(&decoded).into_owned(),
            };
            state.values.with_gcs(&config, Some(&secrets));
        }
    }
    Ok(provider)
}
