//! State functions of the reconcile chain
//!
//! Each function takes the shared [`Context`] and the pass's [`SystemState`]
//! and returns a [`Step`]. Failure paths set a condition before returning so
//! the persisted status always explains why a pass stopped.

mod access;
mod apply;
mod configuration_status;
mod delete;
mod fields;
mod final_status;
mod initialize;
mod logging;
mod storage;
mod verify;

pub use access::is_credentials_secret;
pub use apply::MANAGED_BY;
pub use storage::{BtpHyperscaler, detect_hyperscaler};

use k8s_openapi::api::core::v1::Secret;
use tracing::warn;

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{StateId, Step};
use crate::controller::status::{condition_types, reasons};
use crate::controller::system_state::SystemState;
use crate::crd::State;

pub(crate) async fn dispatch(id: StateId, ctx: &Context, state: &mut SystemState) -> Step {
    match id {
        StateId::Initialize => initialize::initialize(state),
        StateId::ServedFilter => initialize::served_filter(ctx, state).await,
        StateId::AddFinalizer => initialize::add_finalizer(ctx, state).await,
        StateId::AccessConfiguration => access::access_configuration(ctx, state).await,
        StateId::LoggingConfiguration => logging::logging_configuration(state),
        StateId::StorageConfiguration => storage::storage_configuration(ctx, state).await,
        StateId::ConfigurationStatus => configuration_status::configuration_status(ctx, state).await,
        StateId::ApplyResources => apply::apply_resources(ctx, state).await,
        StateId::VerifyResources => verify::verify_resources(ctx, state).await,
        StateId::UpdateFinalStatus => final_status::update_final_status(ctx, state).await,
        StateId::DeleteResources => delete::delete_resources(state),
        StateId::SafeDeletion => delete::safe_deletion(ctx, state).await,
        StateId::Uninstall => delete::uninstall(ctx, state).await,
        StateId::RemoveFinalizer => delete::remove_finalizer(ctx, state).await,
    }
}

/// Shared failure path of the configuration states
fn configuration_failed(state: &mut SystemState, error: Error) -> Step {
    warn!(error = %error, "configuration failed");
    state.set_state(State::Error);
    state.update_condition_false(
        condition_types::CONFIGURED,
        reasons::CONFIGURATION_ERR,
        &error.to_string(),
    );
    Step::StopWithError(error)
}

/// Value of `key` in `secret`, from `data` or `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .or_else(|| secret.string_data.as_ref().and_then(|d| d.get(key).cloned()))
}

/// Fetch a Secret from the instance namespace, failing when it does not exist
async fn fetch_secret(ctx: &Context, namespace: &str, name: &str) -> Result<Secret> {
    ctx.cluster
        .get_secret(namespace, name)
        .await?
        .ok_or_else(|| Error::SecretNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
}

/// Non-empty value of `key`, failing when it is missing
fn required_key(secret: &Secret, secret_name: &str, key: &str) -> Result<String> {
    secret_value(secret, key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::MissingSecretKey {
            secret: secret_name.to_string(),
            key: key.to_string(),
        })
}
