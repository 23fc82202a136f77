use tracing::{debug, warn};

use crate::controller::Context;
use crate::controller::error::Error;
use crate::controller::state_machine::{StateId, Step};
use crate::controller::status::{condition_types, reasons};
use crate::controller::system_state::SystemState;
use crate::crd::State;
use crate::installer::Verification;

/// Wait for the registry workloads to become ready
pub(super) async fn verify_resources(ctx: &Context, state: &mut SystemState) -> Step {
    match ctx.installer.verify(&state.release()).await {
        Err(e) => {
            warn!(error = %e, "verification failed");
            let error = Error::from(e);
            state.set_state(State::Error);
            state.update_condition_false(
                condition_types::INSTALLED,
                reasons::INSTALLATION_ERR,
                &error.to_string(),
            );
            Step::StopWithError(error)
        }
        Ok(Verification::Processing) => {
            debug!("workloads still rolling out");
            Step::RequeueAfter(ctx.config.verify_requeue)
        }
        Ok(Verification::Failed(reason)) => {
            state.set_state(State::Error);
            state.update_condition_true(
                condition_types::DEPLOYMENT_FAILURE,
                reasons::DEPLOYMENT_REPLICA_FAILURE,
                &reason,
            );
            Step::StopWithError(Error::VerificationFailed(reason))
        }
        Ok(Verification::Ready) => {
            state.remove_condition(condition_types::DEPLOYMENT_FAILURE);
            Step::Next(StateId::UpdateFinalStatus)
        }
    }
}
