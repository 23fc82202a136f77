use tracing::warn;

use crate::controller::Context;
use crate::controller::error::Result;
use crate::controller::state_machine::{StateId, Step};
use crate::controller::status::{condition_types, reasons};
use crate::controller::system_state::SystemState;
use crate::crd::State;
use crate::installer::{PreApplyAction, PvcSizeAdjust};

/// Value of the managed-by label on every chart object
pub const MANAGED_BY: &str = "dockerregistry-operator";

pub(super) async fn apply_resources(ctx: &Context, state: &mut SystemState) -> Step {
    if state.condition(condition_types::INSTALLED).is_none() {
        state.update_condition_unknown(
            condition_types::INSTALLED,
            reasons::INSTALLATION,
            "Installing for configuration",
        );
    }
    state.values.with_managed_by_label(MANAGED_BY);

    match install(ctx, state).await {
        Ok(()) => Step::Next(StateId::VerifyResources),
        Err(e) => {
            warn!(error = %e, "installation failed");
            state.set_state(State::Error);
            state.update_condition_false(
                condition_types::INSTALLED,
                reasons::INSTALLATION_ERR,
                &e.to_string(),
            );
            Step::StopWithError(e)
        }
    }
}

async fn install(ctx: &Context, state: &SystemState) -> Result<()> {
    let values = state.values.build()?;
    let pre_actions: Vec<Box<dyn PreApplyAction>> = vec![Box::new(PvcSizeAdjust)];
    ctx.installer
        .install(&state.release(), &values, &pre_actions)
        .await?;
    Ok(())
}
