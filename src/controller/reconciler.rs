//! Reconciliation entry points for DockerRegistry resources
//!
//! One call of [`reconcile`] is one pass: build a fresh [`SystemState`], run the
//! state chain, write the status once, and map the outcome to a controller
//! [`Action`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::state_machine::{self, Outcome};
use crate::controller::status::flush_status;
use crate::controller::system_state::SystemState;
use crate::crd::{DockerRegistry, State};
use crate::health::PassResult;

/// Finalizer guarding chart teardown
pub const FINALIZER: &str = "operator.dockerregistry.io/deletion-hook";

/// Recheck interval for an instance that ended in Warning
const WARNING_RECHECK: Duration = Duration::from_secs(60);

fn retry_key(registry: &DockerRegistry) -> String {
    format!("{}/{}", registry.namespace().unwrap_or_default(), registry.name_any())
}

/// Main reconciliation function
#[instrument(skip(registry, ctx), fields(name = %registry.name_any(), namespace = registry.namespace().unwrap_or_default()))]
pub async fn reconcile(registry: Arc<DockerRegistry>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = registry.namespace().unwrap_or_default();
    let name = registry.name_any();

    info!("Reconciling DockerRegistry");

    let mut state = SystemState::new((*registry).clone(), &ctx.config, ctx.port_source.clone());
    let result = state_machine::run(&ctx, &mut state).await;
    debug!(trace = ?state.trace, "state chain finished");

    let flushed = if state.released {
        Ok(())
    } else {
        flush_status(&ctx, &mut state).await
    };

    if let Some(health) = &ctx.health_state {
        let passed = match (&result, &flushed) {
            (Ok(Outcome::Done), Ok(())) => PassResult::Done,
            (Ok(Outcome::RequeueAfter(_)), Ok(())) => PassResult::Requeue,
            _ => PassResult::Error,
        };
        health
            .metrics
            .observe_pass(&ns, &name, passed, started.elapsed().as_secs_f64());
        if state.released {
            health.metrics.forget_instance(&ns, &name);
        } else if let Some(current) = state.instance.state() {
            health.metrics.set_instance_state(&ns, &name, current);
        }
    }

    let outcome = match (result, flushed) {
        (Err(e), flushed) => {
            if let Err(flush_error) = flushed {
                warn!(error = %flush_error, "failed to write status after failed pass");
            }
            return Err(e);
        }
        (Ok(_), Err(flush_error)) => return Err(flush_error),
        (Ok(outcome), Ok(())) => outcome,
    };

    ctx.reset_attempts(&retry_key(&registry));
    let action = match outcome {
        Outcome::RequeueAfter(after) => Action::requeue(after),
        Outcome::Done if state.instance.state() == Some(State::Warning) && !state.released => {
            Action::requeue(WARNING_RECHECK)
        }
        Outcome::Done => Action::await_change(),
    };
    info!(state = ?state.instance.state(), "Reconciliation completed");
    Ok(action)
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(registry: Arc<DockerRegistry>, error: &Error, ctx: Arc<Context>) -> Action {
    let attempt = ctx.next_attempt(&retry_key(&registry));
    let delay = ctx.backoff.delay_for_error(error, attempt);

    if error.is_retryable() {
        warn!(
            name = %registry.name_any(),
            kind = error.kind(),
            attempt,
            "Retryable error: {}, requeuing in {:?}",
            error,
            delay
        );
    } else {
        error!(
            name = %registry.name_any(),
            kind = error.kind(),
            "Non-retryable error: {}, requeuing in {:?} for manual intervention",
            error,
            delay
        );
    }

    Action::requeue(delay)
}
