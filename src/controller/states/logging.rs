use crate::controller::state_machine::{StateId, Step};
use crate::controller::system_state::SystemState;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_FORMAT: &str = "json";

/// The registry calls the console formatter `text`
fn sanitize_log_format(format: &str) -> &str {
    match format {
        "console" => "text",
        other => other,
    }
}

pub(super) fn logging_configuration(state: &mut SystemState) -> Step {
    let logging = state.instance.spec.logging.clone().unwrap_or_default();

    let level = logging
        .level
        .as_deref()
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let format = logging
        .format
        .as_deref()
        .filter(|f| !f.is_empty())
        .map_or(DEFAULT_LOG_FORMAT, sanitize_log_format);

    state
        .values
        .with_logging(level, format, logging.access_log_disabled);
    Step::Next(StateId::StorageConfiguration)
}
