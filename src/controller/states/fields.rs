//! Desired values of the plain status fields

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{FieldUpdate, StatusField};
use crate::controller::system_state::SystemState;
use crate::resolver::{ResolveError, ResolvedAccess};
use crate::values::{EXTERNAL_ACCESS_SECRET, FULLNAME_OVERRIDE, INTERNAL_ACCESS_SECRET, SERVICE_PORT};

const SECRET_LABEL: &str = "Name of secret with registry access data";
const EXTERNAL_SECRET_LABEL: &str = "Name of secret with registry external access data";

/// Every field the operator maintains, in a stable order
pub(super) async fn desired_fields(ctx: &Context, state: &mut SystemState) -> Result<Vec<FieldUpdate>> {
    let namespace = state.namespace();
    let node_port = state.node_ports.resolve(ctx.cluster.as_ref(), &namespace).await?;

    let mut fields = external_fields(ctx, state).await?;
    fields.extend(internal_fields(&namespace, node_port));
    fields.extend(storage_fields(state));
    Ok(fields)
}

fn internal_fields(namespace: &str, node_port: i32) -> Vec<FieldUpdate> {
    vec![
        FieldUpdate::new(StatusField::InternalEnabled, "True", "Internal access enabled"),
        FieldUpdate::new(
            StatusField::InternalPullAddress,
            format!("localhost:{node_port}"),
            "Internal pull address",
        ),
        FieldUpdate::new(
            StatusField::InternalPushAddress,
            format!("{FULLNAME_OVERRIDE}.{namespace}.svc.cluster.local:{SERVICE_PORT}"),
            "Internal push address",
        ),
        FieldUpdate::new(StatusField::InternalSecretName, INTERNAL_ACCESS_SECRET, SECRET_LABEL),
    ]
}

fn external_disabled_fields() -> Vec<FieldUpdate> {
    vec![
        FieldUpdate::new(StatusField::ExternalEnabled, "False", "External access disabled"),
        FieldUpdate::new(StatusField::ExternalPullAddress, "", "External pull address"),
        FieldUpdate::new(StatusField::ExternalPushAddress, "", "External push address"),
        FieldUpdate::new(StatusField::ExternalGateway, "", "External gateway namespaced name"),
        FieldUpdate::new(StatusField::ExternalSecretName, "", EXTERNAL_SECRET_LABEL),
    ]
}

fn external_enabled_fields(resolved: &ResolvedAccess) -> Vec<FieldUpdate> {
    vec![
        FieldUpdate::new(StatusField::ExternalEnabled, "True", "External access enabled"),
        FieldUpdate::new(StatusField::ExternalPullAddress, resolved.host.as_str(), "External pull address"),
        FieldUpdate::new(StatusField::ExternalPushAddress, resolved.host.as_str(), "External push address"),
        FieldUpdate::new(
            StatusField::ExternalGateway,
            resolved.gateway.as_str(),
            "External gateway namespaced name",
        ),
        FieldUpdate::new(StatusField::ExternalSecretName, EXTERNAL_ACCESS_SECRET, EXTERNAL_SECRET_LABEL),
    ]
}

/// An unavailable gateway keeps the previously reported external fields
async fn external_fields(ctx: &Context, state: &mut SystemState) -> Result<Vec<FieldUpdate>> {
    let Some(access) = state.instance.spec.external_access.clone().filter(|a| a.is_enabled()) else {
        return Ok(external_disabled_fields());
    };

    match state.external_access.resolve(ctx.cluster.as_ref(), &access).await {
        Ok(resolved) => Ok(external_enabled_fields(&resolved)),
        Err(ResolveError::Unavailable(_)) => Ok(Vec::new()),
        Err(ResolveError::Invalid(message)) => Err(Error::ValidationError(message)),
        Err(e) => Err(e.into()),
    }
}

fn storage_fields(state: &SystemState) -> Vec<FieldUpdate> {
    let storage = state.instance.spec.storage.as_ref();
    let pvc = storage
        .and_then(|s| s.pvc.as_ref())
        .map(|p| p.name.clone())
        .unwrap_or_default();
    let delete_enabled = if storage.is_some_and(|s| s.delete_enabled) {
        "True"
    } else {
        "False"
    };

    vec![
        FieldUpdate::new(
            StatusField::Storage,
            state.storage_tag.clone().unwrap_or_default(),
            "Storage type",
        )
        .or_default("filesystem"),
        FieldUpdate::new(StatusField::Pvc, pvc, "PVC name"),
        FieldUpdate::new(
            StatusField::DeleteEnabled,
            delete_enabled,
            "Enable image blobs and manifests by digest",
        ),
    ]
}
