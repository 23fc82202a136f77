//! Per-pass working state of one DockerRegistry

use std::sync::Arc;

use kube::ResourceExt;

use crate::config::OperatorConfig;
use crate::controller::reconciler::FINALIZER;
use crate::controller::state_machine::StateId;
use crate::controller::status::{
    ConditionBuilder, FieldUpdate, apply_field_updates, condition_status,
};
use crate::crd::{Condition, DockerRegistry, DockerRegistryStatus, State};
use crate::installer::Release;
use crate::resolver::{ExternalAccessResolver, NodePortResolver, PortSource};
use crate::values::ValuesBuilder;

/// Everything one reconcile pass accumulates. Built at pass entry and dropped
/// at the end; nothing here outlives the pass.
pub struct SystemState {
    /// Working copy; status mutations land here
    pub instance: DockerRegistry,
    snapshot: Option<DockerRegistryStatus>,
    pub values: ValuesBuilder,
    pub node_ports: NodePortResolver,
    pub external_access: ExternalAccessResolver,
    /// Tag written to `status.storage`, set by the storage state
    pub storage_tag: Option<String>,
    warnings: Vec<String>,
    pending_events: Vec<String>,
    /// States visited, in order
    pub trace: Vec<StateId>,
    /// Set once the finalizer is gone and the object may already be deleted
    pub released: bool,
}

impl SystemState {
    pub fn new(instance: DockerRegistry, config: &OperatorConfig, port_source: Arc<dyn PortSource>) -> Self {
        let prefix = ExternalAccessResolver::host_prefix_for(
            &instance.name_any(),
            &instance.namespace().unwrap_or_default(),
        );
        Self {
            snapshot: instance.status.clone(),
            external_access: ExternalAccessResolver::new(config.default_gateway.clone(), prefix),
            node_ports: NodePortResolver::new(port_source),
            values: ValuesBuilder::new(),
            storage_tag: None,
            warnings: Vec::new(),
            pending_events: Vec::new(),
            trace: Vec::new(),
            released: false,
            instance,
        }
    }

    pub fn name(&self) -> String {
        self.instance.name_any()
    }

    pub fn namespace(&self) -> String {
        self.instance.namespace().unwrap_or_default()
    }

    pub fn release(&self) -> Release {
        Release::new(self.name(), self.namespace())
    }

    pub fn status(&self) -> Option<&DockerRegistryStatus> {
        self.instance.status.as_ref()
    }

    pub fn status_mut(&mut self) -> &mut DockerRegistryStatus {
        self.instance.status.get_or_insert_with(Default::default)
    }

    pub fn set_state(&mut self, state: State) {
        self.status_mut().state = Some(state);
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status()?.conditions.iter().find(|c| c.type_ == type_)
    }

    fn set_condition(&mut self, type_: &str, status: &str, reason: &str, message: &str) {
        let generation = self.instance.metadata.generation;
        let slot = self.status_mut();
        let existing = std::mem::take(&mut slot.conditions);
        slot.conditions = ConditionBuilder::from_existing(existing, generation)
            .set_condition(type_, status, reason, message)
            .build();
    }

    pub fn update_condition_true(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(type_, condition_status::TRUE, reason, message);
    }

    pub fn update_condition_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(type_, condition_status::FALSE, reason, message);
    }

    pub fn update_condition_unknown(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(type_, condition_status::UNKNOWN, reason, message);
    }

    pub fn remove_condition(&mut self, type_: &str) {
        if let Some(status) = self.instance.status.as_mut() {
            let existing = std::mem::take(&mut status.conditions);
            status.conditions = ConditionBuilder::from_existing(existing, None)
                .remove(type_)
                .build();
        }
    }

    /// Record a non-fatal problem reported in the final condition
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    pub fn warning(&self) -> Option<String> {
        if self.warnings.is_empty() {
            None
        } else {
            Some(self.warnings.join("; "))
        }
    }

    /// Apply desired status fields, queueing one event per changed field
    pub fn update_fields(&mut self, updates: &[FieldUpdate]) {
        let messages = apply_field_updates(self.status_mut(), updates);
        self.pending_events.extend(messages);
    }

    pub fn has_finalizer(&self) -> bool {
        self.instance.finalizers().iter().any(|f| f == FINALIZER)
    }

    pub fn status_changed(&self) -> bool {
        self.instance.status != self.snapshot
    }

    /// Adopt the server's view after a successful status write
    pub(crate) fn mark_flushed(&mut self, resource_version: Option<String>) {
        if resource_version.is_some() {
            self.instance.metadata.resource_version = resource_version;
        }
        self.snapshot = self.instance.status.clone();
    }

    pub(crate) fn take_events(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_events)
    }

    pub fn pending_events(&self) -> &[String] {
        &self.pending_events
    }
}
