//! Finite state machine driving one reconcile pass of a DockerRegistry
//!
//! Every state is a variant of [`StateId`]. A state function returns a [`Step`];
//! `Step::Next` moves to another state within the same pass and must follow an
//! edge of [`TRANSITIONS`]. Any other step ends the pass.

use std::fmt;
use std::time::Duration;

use tracing::{debug, trace};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::states;
use crate::controller::system_state::SystemState;

/// States of a reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateId {
    Initialize,
    ServedFilter,
    AddFinalizer,
    AccessConfiguration,
    LoggingConfiguration,
    StorageConfiguration,
    ConfigurationStatus,
    ApplyResources,
    VerifyResources,
    UpdateFinalStatus,
    DeleteResources,
    SafeDeletion,
    Uninstall,
    RemoveFinalizer,
}

impl StateId {
    pub const ALL: [StateId; 14] = [
        StateId::Initialize,
        StateId::ServedFilter,
        StateId::AddFinalizer,
        StateId::AccessConfiguration,
        StateId::LoggingConfiguration,
        StateId::StorageConfiguration,
        StateId::ConfigurationStatus,
        StateId::ApplyResources,
        StateId::VerifyResources,
        StateId::UpdateFinalStatus,
        StateId::DeleteResources,
        StateId::SafeDeletion,
        StateId::Uninstall,
        StateId::RemoveFinalizer,
    ];
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateId::Initialize => "Initialize",
            StateId::ServedFilter => "ServedFilter",
            StateId::AddFinalizer => "AddFinalizer",
            StateId::AccessConfiguration => "AccessConfiguration",
            StateId::LoggingConfiguration => "LoggingConfiguration",
            StateId::StorageConfiguration => "StorageConfiguration",
            StateId::ConfigurationStatus => "ConfigurationStatus",
            StateId::ApplyResources => "ApplyResources",
            StateId::VerifyResources => "VerifyResources",
            StateId::UpdateFinalStatus => "UpdateFinalStatus",
            StateId::DeleteResources => "DeleteResources",
            StateId::SafeDeletion => "SafeDeletion",
            StateId::Uninstall => "Uninstall",
            StateId::RemoveFinalizer => "RemoveFinalizer",
        };
        write!(f, "{name}")
    }
}

/// Outcome of one state function
#[derive(Debug)]
pub enum Step {
    /// Continue with another state in this pass
    Next(StateId),
    /// Nothing left to do until the object changes
    Stop,
    /// Poll again later without counting as a failure
    RequeueAfter(Duration),
    /// Fail the pass; the controller's error policy owns the retry
    StopWithError(Error),
}

/// How a successful pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    RequeueAfter(Duration),
}

/// A legal edge of the state graph
#[derive(Debug)]
pub struct Transition {
    pub from: StateId,
    pub to: StateId,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(from: StateId, to: StateId, description: &'static str) -> Self {
        Self {
            from,
            to,
            description,
        }
    }
}

pub const TRANSITIONS: &[Transition] = &[
    // === Entry ===
    Transition::new(
        StateId::Initialize,
        StateId::ServedFilter,
        "Instance is live, start installation",
    ),
    Transition::new(
        StateId::Initialize,
        StateId::DeleteResources,
        "Deletion timestamp set, start teardown",
    ),
    // === Installation ===
    Transition::new(
        StateId::ServedFilter,
        StateId::AddFinalizer,
        "Instance is the served one",
    ),
    Transition::new(
        StateId::AddFinalizer,
        StateId::AccessConfiguration,
        "Finalizer in place",
    ),
    Transition::new(
        StateId::AccessConfiguration,
        StateId::LoggingConfiguration,
        "Node port and credentials resolved",
    ),
    Transition::new(
        StateId::LoggingConfiguration,
        StateId::StorageConfiguration,
        "Logging values recorded",
    ),
    Transition::new(
        StateId::StorageConfiguration,
        StateId::ConfigurationStatus,
        "Storage backend configured",
    ),
    Transition::new(
        StateId::ConfigurationStatus,
        StateId::ApplyResources,
        "Configuration reported",
    ),
    Transition::new(
        StateId::ApplyResources,
        StateId::VerifyResources,
        "Chart applied",
    ),
    Transition::new(
        StateId::VerifyResources,
        StateId::UpdateFinalStatus,
        "Workloads ready",
    ),
    // === Deletion ===
    Transition::new(
        StateId::DeleteResources,
        StateId::SafeDeletion,
        "Teardown started",
    ),
    Transition::new(
        StateId::SafeDeletion,
        StateId::Uninstall,
        "No orphaned objects",
    ),
    Transition::new(
        StateId::Uninstall,
        StateId::RemoveFinalizer,
        "All chart objects removed",
    ),
];

/// Check whether `from -> to` is an edge of the table
pub fn can_transition(from: StateId, to: StateId) -> bool {
    TRANSITIONS.iter().any(|t| t.from == from && t.to == to)
}

/// States reachable from `state` in one step
pub fn next_states(state: StateId) -> Vec<StateId> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == state)
        .map(|t| t.to)
        .collect()
}

/// Terminal states have no outgoing edges
pub fn is_terminal(state: StateId) -> bool {
    !TRANSITIONS.iter().any(|t| t.from == state)
}

fn describe(from: StateId, to: StateId) -> &'static str {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.to == to)
        .map_or("", |t| t.description)
}

/// Run the chain from [`StateId::Initialize`] until a state stops it
pub async fn run(ctx: &Context, state: &mut SystemState) -> Result<Outcome> {
    run_from(ctx, state, StateId::Initialize).await
}

/// Run the chain starting at `start`
pub async fn run_from(ctx: &Context, state: &mut SystemState, start: StateId) -> Result<Outcome> {
    let mut current = start;
    loop {
        state.trace.push(current);
        trace!(state = %current, "entering state");

        let step = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            step = states::dispatch(current, ctx, state) => step,
        };

        match step {
            Step::Next(next) => {
                if !can_transition(current, next) {
                    return Err(Error::InvalidTransition {
                        from: current,
                        to: next,
                    });
                }
                debug!(from = %current, to = %next, "{}", describe(current, next));
                current = next;
            }
            Step::Stop => return Ok(Outcome::Done),
            Step::RequeueAfter(after) => return Ok(Outcome::RequeueAfter(after)),
            Step::StopWithError(e) => return Err(e),
        }
    }
}
