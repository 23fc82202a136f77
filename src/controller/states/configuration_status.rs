use crate::controller::Context;
use crate::controller::state_machine::{StateId, Step};
use crate::controller::states::configuration_failed;
use crate::controller::states::fields::desired_fields;
use crate::controller::status::{condition_types, reasons};
use crate::controller::system_state::SystemState;
use crate::crd::State;

/// Report the resolved configuration before anything is applied
pub(super) async fn configuration_status(ctx: &Context, state: &mut SystemState) -> Step {
    let fields = match desired_fields(ctx, state).await {
        Ok(fields) => fields,
        Err(e) => return configuration_failed(state, e),
    };
    state.update_fields(&fields);

    state.set_state(State::Processing);
    state.update_condition_true(
        condition_types::CONFIGURED,
        reasons::CONFIGURED,
        "Configuration ready",
    );
    Step::Next(StateId::ApplyResources)
}
