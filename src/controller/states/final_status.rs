use crate::controller::Context;
use crate::controller::state_machine::Step;
use crate::controller::states::fields::desired_fields;
use crate::controller::status::{condition_types, reasons};
use crate::controller::system_state::SystemState;
use crate::crd::State;

pub(super) async fn update_final_status(ctx: &Context, state: &mut SystemState) -> Step {
    let fields = match desired_fields(ctx, state).await {
        Ok(fields) => fields,
        Err(e) => {
            state.set_state(State::Error);
            state.update_condition_false(
                condition_types::INSTALLED,
                reasons::INSTALLATION_ERR,
                &e.to_string(),
            );
            return Step::StopWithError(e);
        }
    };
    state.update_fields(&fields);

    match state.warning() {
        Some(warning) => {
            state.set_state(State::Warning);
            state.update_condition_true(condition_types::INSTALLED, reasons::INSTALLED, &warning);
        }
        None => {
            state.set_state(State::Ready);
            state.update_condition_true(
                condition_types::INSTALLED,
                reasons::INSTALLED,
                "DockerRegistry installed",
            );
        }
    }
    Step::Stop
}
