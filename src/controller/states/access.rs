use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{StateId, Step};
use crate::controller::states::{configuration_failed, secret_value};
use crate::controller::system_state::SystemState;
use crate::controller::validation::validate_external_access;
use crate::resolver::ResolveError;
use crate::values::{
    CONFIG_LABEL_KEY, CONFIG_LABEL_VALUE, FULLNAME_OVERRIDE, HTTP_SECRET_ENV,
    INTERNAL_ACCESS_SECRET, SERVICE_PORT,
};

pub(super) async fn access_configuration(ctx: &Context, state: &mut SystemState) -> Step {
    match configure_access(ctx, state).await {
        Ok(()) => Step::Next(StateId::LoggingConfiguration),
        Err(e) => configuration_failed(state, e),
    }
}

async fn configure_access(ctx: &Context, state: &mut SystemState) -> Result<()> {
    if let Some(access) = &state.instance.spec.external_access {
        validate_external_access(access)?;
    }
    configure_internal_access(ctx, state).await?;
    configure_external_access(ctx, state).await
}

async fn configure_internal_access(ctx: &Context, state: &mut SystemState) -> Result<()> {
    let namespace = state.namespace();

    let existing = ctx.cluster.get_secret(&namespace, INTERNAL_ACCESS_SECRET).await?;
    if let Some(secret) = existing.filter(is_credentials_secret) {
        debug!("reusing existing registry credentials");
        let http_secret = registry_http_secret(ctx, &namespace).await?;
        state
            .values
            .with_registry_credentials(
                &secret_value(&secret, "username").unwrap_or_default(),
                &secret_value(&secret, "password").unwrap_or_default(),
            )
            .with_registry_http_secret(&http_secret);
    }

    let node_port = state.node_ports.resolve(ctx.cluster.as_ref(), &namespace).await?;
    debug!(node_port, "registry node port");
    state
        .values
        .with_node_port(node_port)
        .with_service_port(SERVICE_PORT)
        .with_fullname(FULLNAME_OVERRIDE);
    Ok(())
}

/// Gateway problems the user can fix later only produce a warning
async fn configure_external_access(ctx: &Context, state: &mut SystemState) -> Result<()> {
    let Some(access) = state.instance.spec.external_access.clone().filter(|a| a.is_enabled()) else {
        return Ok(());
    };

    match state.external_access.resolve(ctx.cluster.as_ref(), &access).await {
        Ok(resolved) => {
            state.values.with_virtual_service(&resolved.host, &resolved.gateway);
            Ok(())
        }
        Err(ResolveError::Unavailable(message)) => {
            warn!(reason = %message, "external access unavailable");
            state.warn(message);
            Ok(())
        }
        Err(ResolveError::Invalid(message)) => Err(Error::ValidationError(message)),
        Err(e) => Err(e.into()),
    }
}

/// Credentials are reused only from the secret the chart itself rendered
pub fn is_credentials_secret(secret: &Secret) -> bool {
    secret
        .labels()
        .get(CONFIG_LABEL_KEY)
        .is_some_and(|v| v == CONFIG_LABEL_VALUE)
}

/// Current HTTP secret of the running registry, empty when not deployed yet
async fn registry_http_secret(ctx: &Context, namespace: &str) -> Result<String> {
    let Some(deployment) = ctx.cluster.get_deployment(namespace, FULLNAME_OVERRIDE).await? else {
        return Ok(String::new());
    };
    Ok(deployment
        .spec
        .and_then(|s| s.template.spec)
        .and_then(|s| s.containers.into_iter().next())
        .and_then(|c| c.env)
        .and_then(|env| env.into_iter().find(|e| e.name == HTTP_SECRET_ENV))
        .and_then(|e| e.value)
        .unwrap_or_default())
}
