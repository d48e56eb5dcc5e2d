//! Kubernetes-backed implementations of the client seams.

use async_trait::async_trait;
use hpascale_events::{AuditEvent, EventError, EventType};
use hpascale_id::{ResourceId, TargetRef};
use hpascale_reconcile::ReplicaBounds;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube::{Client, Resource};
use serde_json::json;
use tracing::debug;

use crate::client::{AuditSink, AutoscalerClient, ClientError, StatusReporter};
use crate::crd::{HpaScaler, HpaScalerStatus};

/// Classify a kube error by how the caller should react.
pub fn map_kube_error(err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => ClientError::NotFound(resp.message),
            409 => ClientError::Conflict(resp.message),
            400 | 403 | 422 => ClientError::Invalid(resp.message),
            _ => ClientError::Transient(resp.message),
        },
        other => ClientError::Transient(other.to_string()),
    }
}

fn patch_params(field_manager: &str) -> PatchParams {
    PatchParams {
        field_manager: Some(field_manager.to_string()),
        ..PatchParams::default()
    }
}

// =============================================================================
// Autoscaler
// =============================================================================

/// Reads and patches `autoscaling/v2` HorizontalPodAutoscalers.
#[derive(Clone)]
pub struct KubeAutoscalerClient {
    client: Client,
    field_manager: String,
}

impl KubeAutoscalerClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, target: &TargetRef) -> Api<HorizontalPodAutoscaler> {
        Api::namespaced(self.client.clone(), target.namespace())
    }
}

#[async_trait]
impl AutoscalerClient for KubeAutoscalerClient {
    async fn get_bounds(&self, target: &TargetRef) -> Result<ReplicaBounds, ClientError> {
        let hpa = self
            .api(target)
            .get(target.name())
            .await
            .map_err(map_kube_error)?;

        let spec = hpa
            .spec
            .ok_or_else(|| ClientError::Invalid(format!("{target} has no spec")))?;

        // The API server defaults an absent minReplicas to 1.
        Ok(ReplicaBounds::new(
            spec.min_replicas.unwrap_or(1),
            spec.max_replicas,
        ))
    }

    async fn patch_bounds(
        &self,
        target: &TargetRef,
        bounds: ReplicaBounds,
    ) -> Result<(), ClientError> {
        let patch = json!({
            "spec": {
                "minReplicas": bounds.min_replicas,
                "maxReplicas": bounds.max_replicas,
            }
        });

        self.api(target)
            .patch(
                target.name(),
                &patch_params(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(map_kube_error)?;

        debug!(target = %target, bounds = %bounds, "Merge-patched autoscaler");
        Ok(())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Writes `HpaScaler` status through the status subresource.
#[derive(Clone)]
pub struct KubeStatusReporter {
    client: Client,
    field_manager: String,
}

impl KubeStatusReporter {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl StatusReporter for KubeStatusReporter {
    async fn report(&self, id: &ResourceId, status: &HpaScalerStatus) -> Result<(), ClientError> {
        let api: Api<HpaScaler> = Api::namespaced(self.client.clone(), id.namespace());
        let patch = json!({ "status": status });

        match api
            .patch_status(
                id.name(),
                &patch_params(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match map_kube_error(e) {
                ClientError::NotFound(_) => {
                    debug!(resource = %id, "Resource gone, skipping status write");
                    Ok(())
                }
                other => Err(other),
            },
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Publishes audit events as Kubernetes events on the watched resource.
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: impl Into<String>) -> Self {
        let reporter = Reporter {
            controller: controller.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

/// Reference to the `HpaScaler` an event belongs to.
pub fn object_reference(id: &ResourceId) -> ObjectReference {
    ObjectReference {
        api_version: Some(HpaScaler::api_version(&()).to_string()),
        kind: Some(HpaScaler::kind(&()).to_string()),
        namespace: Some(id.namespace().to_string()),
        name: Some(id.name().to_string()),
        ..ObjectReference::default()
    }
}

#[async_trait]
impl AuditSink for KubeEventRecorder {
    async fn record(&self, event: &AuditEvent) -> Result<(), EventError> {
        let type_ = match event.event_type {
            EventType::Normal => KubeEventType::Normal,
            EventType::Warning => KubeEventType::Warning,
        };

        let kube_event = Event {
            type_,
            reason: event.reason.clone(),
            note: Some(event.message.clone()),
            action: event.action.clone(),
            secondary: None,
        };

        self.recorder
            .publish(&kube_event, &object_reference(&event.resource))
            .await
            .map_err(|e| EventError::Sink(e.to_string()))
    }
}
