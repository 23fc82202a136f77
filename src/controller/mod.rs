pub mod cleanup;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod state_machine;
mod states;
pub mod status;
pub mod system_state;
pub mod validation;

pub use cleanup::RemoveLabeledSecrets;
pub use context::{CONTROLLER_NAME, Context};
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{FINALIZER, error_policy, reconcile};
pub use state_machine::{Outcome, StateId, Step, TRANSITIONS, can_transition, next_states};
pub use states::{BtpHyperscaler, MANAGED_BY, detect_hyperscaler, is_credentials_secret, secret_value};
pub use status::{ConditionBuilder, FieldUpdate, StatusField, apply_field_updates, flush_status};
pub use system_state::SystemState;
pub use validation::{validate_external_access, validate_storage};
