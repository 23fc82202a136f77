//! Status conditions and status field updates for DockerRegistry resources
//!
//! State functions never write status to the API server themselves. They mutate
//! the working copy held in [`SystemState`]; [`flush_status`] writes it once at
//! the end of a pass and only when it differs from the snapshot taken when the
//! pass started.

use chrono::Utc;
use kube::Resource;
use kube::runtime::events::EventType;
use tracing::debug;

use crate::cluster::reasons as event_reasons;
use crate::controller::Context;
use crate::controller::error::Result;
use crate::controller::system_state::SystemState;
use crate::crd::{Condition, DockerRegistryStatus};

/// Condition types reported on a DockerRegistry
pub mod condition_types {
    /// Chart values could be assembled from the spec
    pub const CONFIGURED: &str = "Configured";
    /// The chart is applied and its workloads are ready
    pub const INSTALLED: &str = "Installed";
    /// A registry workload failed to roll out
    pub const DEPLOYMENT_FAILURE: &str = "DeploymentFailure";
    /// Teardown progress
    pub const DELETED: &str = "Deleted";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Condition reasons
pub mod reasons {
    pub const CONFIGURED: &str = "Configured";
    pub const CONFIGURATION_ERR: &str = "ConfigurationErr";
    pub const INSTALLATION: &str = "Installation";
    pub const INSTALLATION_ERR: &str = "InstallationErr";
    pub const INSTALLED: &str = "Installed";
    pub const DUPLICATED: &str = "Duplicated";
    pub const DELETION: &str = "Deletion";
    pub const DELETION_ERR: &str = "DeletionErr";
    pub const DELETED: &str = "Deleted";
    pub const DEPLOYMENT_REPLICA_FAILURE: &str = "DeploymentReplicaFailure";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't.
    /// `last_transition_time` moves only when the status changes.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Utc::now().to_rfc3339();
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Drop the condition of `type_`, if present
    pub fn remove(mut self, type_: &str) -> Self {
        self.conditions.retain(|c| c.type_ != type_);
        self
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Plain string fields of [`DockerRegistryStatus`] maintained by the differ
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusField {
    InternalEnabled,
    InternalPullAddress,
    InternalPushAddress,
    InternalSecretName,
    ExternalEnabled,
    ExternalPullAddress,
    ExternalPushAddress,
    ExternalSecretName,
    ExternalGateway,
    Storage,
    Pvc,
    DeleteEnabled,
}

impl StatusField {
    pub fn get(self, status: &DockerRegistryStatus) -> &str {
        match self {
            StatusField::InternalEnabled => &status.internal_access.enabled,
            StatusField::InternalPullAddress => &status.internal_access.pull_address,
            StatusField::InternalPushAddress => &status.internal_access.push_address,
            StatusField::InternalSecretName => &status.internal_access.secret_name,
            StatusField::ExternalEnabled => &status.external_access.enabled,
            StatusField::ExternalPullAddress => &status.external_access.pull_address,
            StatusField::ExternalPushAddress => &status.external_access.push_address,
            StatusField::ExternalSecretName => &status.external_access.secret_name,
            StatusField::ExternalGateway => &status.external_access.gateway,
            StatusField::Storage => &status.storage,
            StatusField::Pvc => &status.pvc,
            StatusField::DeleteEnabled => &status.delete_enabled,
        }
    }

    fn slot(self, status: &mut DockerRegistryStatus) -> &mut String {
        match self {
            StatusField::InternalEnabled => &mut status.internal_access.enabled,
            StatusField::InternalPullAddress => &mut status.internal_access.pull_address,
            StatusField::InternalPushAddress => &mut status.internal_access.push_address,
            StatusField::InternalSecretName => &mut status.internal_access.secret_name,
            StatusField::ExternalEnabled => &mut status.external_access.enabled,
            StatusField::ExternalPullAddress => &mut status.external_access.pull_address,
            StatusField::ExternalPushAddress => &mut status.external_access.push_address,
            StatusField::ExternalSecretName => &mut status.external_access.secret_name,
            StatusField::ExternalGateway => &mut status.external_access.gateway,
            StatusField::Storage => &mut status.storage,
            StatusField::Pvc => &mut status.pvc,
            StatusField::DeleteEnabled => &mut status.delete_enabled,
        }
    }
}

/// Desired value of one status field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldUpdate {
    pub desired: String,
    pub field: StatusField,
    /// Human readable name used in the change event
    pub label: &'static str,
    /// Used when `desired` is empty
    pub default: &'static str,
}

impl FieldUpdate {
    pub fn new(field: StatusField, desired: impl Into<String>, label: &'static str) -> Self {
        Self {
            desired: desired.into(),
            field,
            label,
            default: "",
        }
    }

    pub fn or_default(mut self, default: &'static str) -> Self {
        self.default = default;
        self
    }
}

/// Apply `updates` to `status`. Returns one event message per field that changed.
pub fn apply_field_updates(status: &mut DockerRegistryStatus, updates: &[FieldUpdate]) -> Vec<String> {
    let mut messages = Vec::new();
    for update in updates {
        let desired = if update.desired.is_empty() {
            update.default
        } else {
            update.desired.as_str()
        };

        let slot = update.field.slot(status);
        if slot != desired {
            messages.push(format!("{} set from '{}' to '{}'", update.label, slot, desired));
            *slot = desired.to_string();
        }
    }
    messages
}

/// Persist the working status if it changed during the pass, then publish the
/// queued change events. Events are dropped when the status ends up unchanged.
pub async fn flush_status(ctx: &Context, state: &mut SystemState) -> Result<()> {
    if !state.status_changed() {
        state.take_events();
        return Ok(());
    }

    let updated = ctx.cluster.replace_registry_status(&state.instance).await?;
    state.mark_flushed(updated.metadata.resource_version);
    debug!(state = ?state.instance.state(), "status written");

    let reference = state.instance.object_ref(&());
    for note in state.take_events() {
        ctx.events
            .publish(
                &reference,
                EventType::Normal,
                event_reasons::CONFIGURATION,
                "Reconcile",
                Some(note),
            )
            .await;
    }
    Ok(())
}
