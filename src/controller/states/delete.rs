use kube::ResourceExt;
use tracing::{info, warn};

use crate::controller::Context;
use crate::controller::cleanup::RemoveLabeledSecrets;
use crate::controller::error::Error;
use crate::controller::reconciler::FINALIZER;
use crate::controller::state_machine::{StateId, Step};
use crate::controller::status::{condition_types, flush_status, reasons};
use crate::controller::system_state::SystemState;
use crate::crd::State;
use crate::installer::PostUninstallAction;

pub(super) fn delete_resources(state: &mut SystemState) -> Step {
    if !state.has_finalizer() {
        // nothing was installed; the object goes away on its own
        state.released = true;
        return Step::Stop;
    }

    state.set_state(State::Deleting);
    state.update_condition_unknown(condition_types::DELETED, reasons::DELETION, "Uninstalling");
    Step::Next(StateId::SafeDeletion)
}

/// Never tear down while objects outside the manifest carry the release label
pub(super) async fn safe_deletion(ctx: &Context, state: &mut SystemState) -> Step {
    match ctx.installer.check_orphan_resources(&state.release()).await {
        Ok(orphans) if orphans.is_empty() => Step::Next(StateId::Uninstall),
        Ok(orphans) => {
            let error = Error::OrphanResources(orphans.join(", "));
            warn!(error = %error, "refusing to uninstall");
            state.set_state(State::Warning);
            state.update_condition_false(
                condition_types::DELETED,
                reasons::DELETION_ERR,
                &error.to_string(),
            );
            Step::StopWithError(error)
        }
        Err(e) => deletion_failed(state, e.into()),
    }
}

pub(super) async fn uninstall(ctx: &Context, state: &mut SystemState) -> Step {
    let post_actions: Vec<Box<dyn PostUninstallAction>> =
        vec![Box::new(RemoveLabeledSecrets::credentials(ctx.cluster.clone()))];

    match ctx.installer.uninstall(&state.release(), &post_actions).await {
        Err(e) => deletion_failed(state, e.into()),
        Ok(false) => {
            state.set_state(State::Deleting);
            state.update_condition_unknown(
                condition_types::DELETED,
                reasons::DELETION,
                "Deleting module resources",
            );
            Step::RequeueAfter(ctx.config.uninstall_requeue)
        }
        Ok(true) => {
            state.set_state(State::Deleting);
            state.update_condition_true(
                condition_types::DELETED,
                reasons::DELETED,
                "DockerRegistry module deleted",
            );
            Step::Next(StateId::RemoveFinalizer)
        }
    }
}

fn deletion_failed(state: &mut SystemState, error: Error) -> Step {
    warn!(error = %error, "uninstall failed");
    state.set_state(State::Error);
    state.update_condition_false(
        condition_types::DELETED,
        reasons::DELETION_ERR,
        &error.to_string(),
    );
    Step::StopWithError(error)
}

/// Last action of teardown. Status is written first because the object may
/// disappear as soon as the finalizer is gone.
pub(super) async fn remove_finalizer(ctx: &Context, state: &mut SystemState) -> Step {
    if let Err(e) = flush_status(ctx, state).await {
        return Step::StopWithError(e);
    }

    let mut updated = state.instance.clone();
    updated.finalizers_mut().retain(|f| f != FINALIZER);
    match ctx.cluster.replace_registry(&updated).await {
        Ok(_) => {
            info!("removed finalizer");
            state.released = true;
            Step::Stop
        }
        Err(e) if e.is_not_found() => {
            state.released = true;
            Step::Stop
        }
        Err(e) => Step::StopWithError(e),
    }
}
