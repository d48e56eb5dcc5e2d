//! Regime convergence action.
//!
//! One call brings the target autoscaler's bounds to the bounds of the
//! decided regime: read, compare, patch only on divergence, and record one
//! audit event per write. The read and the write are separate steps so a
//! caller can abandon the read without ever leaving a patch unrecorded.
//! Repeated calls against an already-converged target issue no writes and
//! no events.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use hpascale_events::{AuditEvent, EventKind};
use hpascale_id::{ResourceId, TargetRef};
use hpascale_reconcile::{ApplyOutcome, Regime, ReplicaBounds, Window};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{AuditSink, AutoscalerClient, ClientError};

/// Convergence failures, split by whether the owning task may continue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvergeError {
    /// Worth another attempt on a later tick.
    #[error("retryable: {0}")]
    Retryable(#[source] ClientError),

    /// The target is permanently unusable; the task must stop.
    #[error("fatal: {0}")]
    Fatal(#[source] ClientError),
}

impl ConvergeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A missing or malformed target cannot be fixed by retrying the read.
fn classify_read(err: ClientError) -> ConvergeError {
    match err {
        ClientError::NotFound(_) | ClientError::Invalid(_) => ConvergeError::Fatal(err),
        ClientError::Conflict(_) | ClientError::Transient(_) => ConvergeError::Retryable(err),
    }
}

/// The target was readable a moment ago, so only a rejected request is fatal.
fn classify_patch(err: ClientError) -> ConvergeError {
    match err {
        ClientError::Invalid(_) => ConvergeError::Fatal(err),
        _ => ConvergeError::Retryable(err),
    }
}

fn event_kind(regime: Regime) -> EventKind {
    match regime {
        Regime::ScaleUp => EventKind::ScalingUpScheduled,
        Regime::ScaleDown => EventKind::ScalingDownScheduled,
    }
}

fn direction(regime: Regime) -> &'static str {
    match regime {
        Regime::ScaleUp => "up",
        Regime::ScaleDown => "down",
    }
}

/// Applies a decided regime to a target autoscaler.
pub struct Converger {
    client: Arc<dyn AutoscalerClient>,
    audit: Arc<dyn AuditSink>,
}

impl Converger {
    pub fn new(client: Arc<dyn AutoscalerClient>, audit: Arc<dyn AuditSink>) -> Self {
        Self { client, audit }
    }

    /// Converge `target` to the bounds of `window`, the window matching `regime`.
    pub async fn apply(
        &self,
        resource: &ResourceId,
        target: &TargetRef,
        regime: Regime,
        window: &Window,
        decided_at: DateTime<Utc>,
    ) -> Result<ApplyOutcome, ConvergeError> {
        let current = self.observe(target).await?;
        self.converge_from(resource, target, regime, window, current, decided_at)
            .await
    }

    /// Read the target's current bounds.
    ///
    /// Nothing has been written yet when this returns, so callers may abandon
    /// the future at any point.
    pub async fn observe(&self, target: &TargetRef) -> Result<ReplicaBounds, ConvergeError> {
        self.client.get_bounds(target).await.map_err(classify_read)
    }

    /// Patch `target` from the observed `current` bounds and record the write.
    ///
    /// Must run to completion once started: the audit event is recorded
    /// after the patch lands.
    pub async fn converge_from(
        &self,
        resource: &ResourceId,
        target: &TargetRef,
        regime: Regime,
        window: &Window,
        current: ReplicaBounds,
        decided_at: DateTime<Utc>,
    ) -> Result<ApplyOutcome, ConvergeError> {
        let desired = window.bounds();

        if current == desired {
            debug!(
                resource = %resource,
                target = %target,
                regime = %regime,
                bounds = %desired,
                "Target already converged"
            );
            return Ok(ApplyOutcome::NoOp);
        }

        self.client
            .patch_bounds(target, desired)
            .await
            .map_err(classify_patch)?;

        info!(
            resource = %resource,
            target = %target,
            regime = %regime,
            from = %current,
            to = %desired,
            "Patched autoscaler bounds"
        );

        let message = format!(
            "Scheduled scaling {} for {}: {} (was {}), decided at {}",
            direction(regime),
            target,
            desired,
            current,
            decided_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        let event = AuditEvent::new(event_kind(regime), resource.clone(), message, decided_at);
        if let Err(e) = self.audit.record(&event).await {
            warn!(resource = %resource, error = %e, "Failed to record scaling event");
        }

        Ok(ApplyOutcome::Applied(desired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeAutoscaler, RecordingAuditSink};
    use chrono::TimeZone;
    use rstest::rstest;

    fn resource() -> ResourceId {
        ResourceId::new("payments", "nightly-scaler").unwrap()
    }

    fn target() -> TargetRef {
        TargetRef::new("payments", "api-hpa").unwrap()
    }

    fn decided_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, 8, 0, 0).unwrap()
    }

    fn setup(current: ReplicaBounds) -> (Arc<FakeAutoscaler>, Arc<RecordingAuditSink>, Converger) {
        let client = Arc::new(FakeAutoscaler::new().with_target(target(), current));
        let audit = Arc::new(RecordingAuditSink::new());
        let converger = Converger::new(client.clone(), audit.clone());
        (client, audit, converger)
    }

    #[tokio::test]
    async fn test_apply_patches_and_records_once() {
        let (client, audit, converger) = setup(ReplicaBounds::new(1, 3));
        let window = Window::new("0 8 * * *", 5, 10);

        let outcome = converger
            .apply(&resource(), &target(), Regime::ScaleUp, &window, decided_at())
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied(ReplicaBounds::new(5, 10)));
        assert_eq!(client.bounds(&target()), Some(ReplicaBounds::new(5, 10)));
        assert_eq!(client.patch_count(), 1);

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ScalingUpScheduled);
        assert_eq!(events[0].resource, resource());
        assert_eq!(events[0].occurred_at, decided_at());
        assert!(events[0].message.contains("min=5 max=10"));
        assert!(events[0].message.contains("2024-03-06T08:00:00Z"));
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let (client, audit, converger) = setup(ReplicaBounds::new(1, 3));
        let window = Window::new("0 8 * * *", 5, 10);

        for _ in 0..3 {
            converger
                .apply(&resource(), &target(), Regime::ScaleUp, &window, decided_at())
                .await
                .unwrap();
        }

        assert_eq!(client.patch_count(), 1);
        assert_eq!(audit.events().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_noop_when_converged() {
        let (client, audit, converger) = setup(ReplicaBounds::new(1, 3));
        let window = Window::new("0 20 * * *", 1, 3);

        let outcome = converger
            .apply(&resource(), &target(), Regime::ScaleDown, &window, decided_at())
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::NoOp);
        assert_eq!(client.patch_count(), 0);
        assert!(audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_target_is_fatal() {
        let client = Arc::new(FakeAutoscaler::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let converger = Converger::new(client.clone(), audit.clone());

        let err = converger
            .apply(
                &resource(),
                &target(),
                Regime::ScaleUp,
                &Window::new("0 8 * * *", 5, 10),
                decided_at(),
            )
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(audit.events().is_empty());
    }

    #[rstest]
    #[case::read_conflict(true, ClientError::Conflict("stale".into()), false)]
    #[case::read_transient(true, ClientError::Transient("timeout".into()), false)]
    #[case::read_invalid(true, ClientError::Invalid("forbidden".into()), true)]
    #[case::patch_not_found(false, ClientError::NotFound("gone".into()), false)]
    #[case::patch_conflict(false, ClientError::Conflict("stale".into()), false)]
    #[case::patch_invalid(false, ClientError::Invalid("rejected".into()), true)]
    #[tokio::test]
    async fn test_error_classification(
        #[case] on_read: bool,
        #[case] error: ClientError,
        #[case] fatal: bool,
    ) {
        let (client, audit, converger) = setup(ReplicaBounds::new(1, 3));
        if on_read {
            client.fail_next_get(error);
        } else {
            client.fail_next_patch(error);
        }

        let err = converger
            .apply(
                &resource(),
                &target(),
                Regime::ScaleUp,
                &Window::new("0 8 * * *", 5, 10),
                decided_at(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.is_fatal(), fatal);
        assert_eq!(client.patch_count(), 0);
        assert!(audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_apply() {
        let (client, audit, converger) = setup(ReplicaBounds::new(1, 3));
        audit.set_failing(true);

        let outcome = converger
            .apply(
                &resource(),
                &target(),
                Regime::ScaleUp,
                &Window::new("0 8 * * *", 5, 10),
                decided_at(),
            )
            .await
            .unwrap();

        assert!(outcome.is_applied());
        assert_eq!(client.patch_count(), 1);
    }
}
