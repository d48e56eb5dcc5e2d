//! Reconciliation handlers.
//!
//! Translate `HpaScaler` notifications into validated schedules and drive the
//! task manager. A resource that fails validation gets an error status and a
//! warning event and never owns a task.

use std::sync::Arc;

use hpascale_events::{AuditEvent, EventKind};
use hpascale_id::{IdError, ResourceId, TargetRef};
use hpascale_reconcile::{ScheduleSpec, SpecError, Window};
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{AuditSink, StatusReporter};
use crate::clock::Clock;
use crate::crd::{HpaScaler, HpaScalerStatus, WindowSpec};
use crate::manager::{TaskManager, Transition};

/// Why a resource cannot be scheduled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: i64 },
}

/// Identity of a watched resource.
pub fn resource_id(obj: &HpaScaler) -> Result<ResourceId, ValidationError> {
    let namespace = obj
        .namespace()
        .ok_or(ValidationError::MissingField("metadata.namespace"))?;
    Ok(ResourceId::new(namespace, obj.name_any())?)
}

/// Build the validated schedule a resource asks for.
///
/// The target namespace defaults to the resource's own.
pub fn schedule_spec_from(obj: &HpaScaler) -> Result<ScheduleSpec, ValidationError> {
    let spec = &obj.spec;

    let hpa_name = spec
        .hpa_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(ValidationError::MissingField("spec.hpaName"))?;

    let namespace = match spec.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        Some(ns) => ns.to_string(),
        None => obj
            .namespace()
            .ok_or(ValidationError::MissingField("spec.namespace"))?,
    };
    let target = TargetRef::new(namespace, hpa_name)?;

    let start = window_from(spec.schedule_start.as_ref(), &START_FIELDS)?;
    let end = window_from(spec.schedule_end.as_ref(), &END_FIELDS)?;

    Ok(ScheduleSpec::new(target, start, end)?)
}

/// Field paths used in error messages, per window.
struct FieldNames {
    window: &'static str,
    cron: &'static str,
    min: &'static str,
    max: &'static str,
}

const START_FIELDS: FieldNames = FieldNames {
    window: "spec.scheduleStart",
    cron: "spec.scheduleStart.cronExpression",
    min: "spec.scheduleStart.minReplicas",
    max: "spec.scheduleStart.maxReplicas",
};

const END_FIELDS: FieldNames = FieldNames {
    window: "spec.scheduleEnd",
    cron: "spec.scheduleEnd.cronExpression",
    min: "spec.scheduleEnd.minReplicas",
    max: "spec.scheduleEnd.maxReplicas",
};

fn window_from(spec: Option<&WindowSpec>, names: &FieldNames) -> Result<Window, ValidationError> {
    let spec = spec.ok_or(ValidationError::MissingField(names.window))?;

    let cron = spec
        .cron_expression
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or(ValidationError::MissingField(names.cron))?;
    let min = replicas(spec.min_replicas, names.min)?;
    let max = replicas(spec.max_replicas, names.max)?;

    Ok(Window::new(cron, min, max))
}

fn replicas(value: Option<i64>, field: &'static str) -> Result<i32, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField(field))?;
    i32::try_from(value).map_err(|_| ValidationError::OutOfRange { field, value })
}

/// Entry points called by the watch loop.
pub struct Handlers {
    manager: Arc<TaskManager>,
    status: Arc<dyn StatusReporter>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl Handlers {
    pub fn new(
        manager: Arc<TaskManager>,
        status: Arc<dyn StatusReporter>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            manager,
            status,
            audit,
            clock,
        }
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    /// A resource appeared.
    pub async fn on_create(&self, obj: &HpaScaler) -> Result<Transition, ValidationError> {
        let id = resource_id(obj)?;
        match schedule_spec_from(obj) {
            Ok(spec) => Ok(self.manager.on_create(&id, spec).await),
            Err(e) => Err(self.reject(&id, obj, e).await),
        }
    }

    /// A resource was created or changed. Untracked resources are started.
    pub async fn on_update(&self, obj: &HpaScaler) -> Result<Transition, ValidationError> {
        let id = resource_id(obj)?;
        match schedule_spec_from(obj) {
            Ok(spec) => {
                let transition = self.manager.on_update(&id, spec).await;
                debug!(resource = %id, transition = ?transition, "Applied resource");
                Ok(transition)
            }
            Err(e) => Err(self.reject(&id, obj, e).await),
        }
    }

    /// A resource went away. Its spec is irrelevant.
    pub async fn on_delete(&self, obj: &HpaScaler) -> Result<Transition, ValidationError> {
        let id = resource_id(obj)?;
        Ok(self.on_delete_id(&id).await)
    }

    /// Delete by identity, for deletes reconstructed after a relist.
    pub async fn on_delete_id(&self, id: &ResourceId) -> Transition {
        self.manager.on_delete(id).await
    }

    /// Stop any task and surface the validation error on the resource.
    async fn reject(&self, id: &ResourceId, obj: &HpaScaler, err: ValidationError) -> ValidationError {
        warn!(resource = %id, error = %err, "Rejected resource spec");

        if self.manager.current_spec(id).await.is_some() {
            info!(resource = %id, "Stopping task for now-invalid spec");
            self.manager.on_delete(id).await;
        }

        let desired = HpaScalerStatus::stopped(Some(err.to_string()));
        if obj.status.as_ref() == Some(&desired) {
            debug!(resource = %id, "Rejection already surfaced");
            return err;
        }

        if let Err(e) = self.status.report(id, &desired).await {
            warn!(resource = %id, error = %e, "Failed to write rejection status");
        }

        let event = AuditEvent::new(
            EventKind::ConfigurationRejected,
            id.clone(),
            format!("Invalid scaling configuration: {err}"),
            self.clock.now(),
        );
        if let Err(e) = self.audit.record(&event).await {
            warn!(resource = %id, error = %e, "Failed to record rejection");
        }

        err
    }
}
