//! Interfaces to the operator's external collaborators.
//!
//! The interfaces abstract every call that leaves the process:
//! - Reading and patching the target autoscaler's bounds
//! - Recording audit events
//! - Writing status back onto the watched resource
//!
//! Kubernetes-backed implementations live in `kube_client`; in-memory fakes
//! for tests live in `fake`.

use async_trait::async_trait;
use hpascale_events::{AuditEvent, EventError};
use hpascale_id::{ResourceId, TargetRef};
use hpascale_reconcile::ReplicaBounds;
use thiserror::Error;

use crate::crd::HpaScalerStatus;

/// Errors returned by API clients, classified by how callers react.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request can never succeed as issued (bad reference, forbidden, rejected).
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Anything that may succeed on a later attempt.
    #[error("transient error: {0}")]
    Transient(String),
}

/// Access to the target autoscaler object.
#[async_trait]
pub trait AutoscalerClient: Send + Sync {
    /// Read the current bounds.
    async fn get_bounds(&self, target: &TargetRef) -> Result<ReplicaBounds, ClientError>;

    /// Merge-patch `minReplicas`/`maxReplicas` only.
    async fn patch_bounds(&self, target: &TargetRef, bounds: ReplicaBounds)
        -> Result<(), ClientError>;
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), EventError>;
}

/// Writes status onto a watched resource.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Replace the resource's status. Writing to a vanished resource is not an error.
    async fn report(&self, id: &ResourceId, status: &HpaScalerStatus) -> Result<(), ClientError>;
}
