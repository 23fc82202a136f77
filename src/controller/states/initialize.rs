use kube::ResourceExt;
use tracing::{info, warn};

use crate::controller::Context;
use crate::controller::reconciler::FINALIZER;
use crate::controller::state_machine::{StateId, Step};
use crate::controller::status::{condition_types, reasons};
use crate::controller::system_state::SystemState;
use crate::crd::{DockerRegistry, Served, State};

/// Choose between installation and teardown
pub(super) fn initialize(state: &mut SystemState) -> Step {
    state.set_state(State::Processing);

    if state.instance.metadata.deletion_timestamp.is_some() {
        return Step::Next(StateId::DeleteResources);
    }
    Step::Next(StateId::ServedFilter)
}

/// Only one DockerRegistry per cluster is installed
pub(super) async fn served_filter(ctx: &Context, state: &mut SystemState) -> Step {
    if state.status().and_then(|s| s.served) == Some(Served::True) {
        return Step::Next(StateId::AddFinalizer);
    }

    let registries = match ctx.cluster.list_registries().await {
        Ok(registries) => registries,
        Err(e) => return Step::StopWithError(e),
    };
    let namespace = state.namespace();
    let name = state.name();
    let served_elsewhere = registries.iter().find(|r| {
        is_served(r) && !(r.namespace().unwrap_or_default() == namespace && r.name_any() == name)
    });

    match served_elsewhere {
        None => {
            info!("instance is now served");
            state.status_mut().served = Some(Served::True);
            Step::Next(StateId::AddFinalizer)
        }
        Some(other) => {
            let message = format!(
                "Only one instance of DockerRegistry is allowed (current served instance: {}/{}). This DockerRegistry CR is redundant. Remove it to fix the problem.",
                other.namespace().unwrap_or_default(),
                other.name_any()
            );
            warn!(served = %other.name_any(), "duplicated instance");
            state.status_mut().served = Some(Served::False);
            state.set_state(State::Warning);
            state.update_condition_false(condition_types::INSTALLED, reasons::DUPLICATED, &message);
            Step::Stop
        }
    }
}

fn is_served(registry: &DockerRegistry) -> bool {
    registry.status.as_ref().and_then(|s| s.served) == Some(Served::True)
}

/// Attach the deletion hook before anything gets installed
pub(super) async fn add_finalizer(ctx: &Context, state: &mut SystemState) -> Step {
    if state.has_finalizer() {
        return Step::Next(StateId::AccessConfiguration);
    }

    let mut updated = state.instance.clone();
    updated.finalizers_mut().push(FINALIZER.to_string());
    match ctx.cluster.replace_registry(&updated).await {
        Ok(stored) => {
            // status of the reply is the server's; keep the working copy's
            state.instance.metadata = stored.metadata;
            info!("added finalizer");
            Step::Next(StateId::AccessConfiguration)
        }
        Err(e) => Step::StopWithError(e),
    }
}
