//! Background scheduling task.
//!
//! One task runs per tracked resource. Each iteration:
//! - Evaluates the cron window at the current wall-clock time
//! - Converges the target when the regime differs from the last applied one
//! - Sleeps until the next boundary, the safety ceiling or a retry delay
//!
//! Cancellation is a `watch` flag checked before every step and raced
//! against both the target read and the sleep. A started write always
//! finishes with its audit event.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hpascale_events::{AuditEvent, EventKind};
use hpascale_id::ResourceId;
use hpascale_reconcile::{evaluate, Regime, ScheduleError, ScheduleSpec, SpecHash};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{AuditSink, ClientError, StatusReporter};
use crate::clock::Clock;
use crate::converge::{ConvergeError, Converger};
use crate::crd::HpaScalerStatus;

// =============================================================================
// Backoff Policy
// =============================================================================

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: hpascale_reconcile::DEFAULT_RETRY_BASE,
            max: hpascale_reconcile::DEFAULT_RETRY_MAX,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(31) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exponent);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter = rand_jitter(delay * self.jitter);
        let final_delay = (delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

/// Jitter in `[-range, range]` from a single LCG step over the clock.
fn rand_jitter(range: f64) -> f64 {
    if range <= 0.0 {
        return 0.0;
    }
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = (seed.wrapping_mul(6364136223846793005).wrapping_add(1)) as f64;
    let normalized = (random / u64::MAX as f64) * 2.0 - 1.0;
    normalized * range
}

// =============================================================================
// Errors
// =============================================================================

/// Why a task stopped on its own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A cron expression cannot be evaluated any more.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// The target autoscaler is permanently unusable.
    #[error("target unusable: {0}")]
    Fatal(#[source] ClientError),
}

impl TaskError {
    /// Event reason surfaced alongside `SchedulingFailed`.
    pub fn reason(&self) -> &'static str {
        match self {
            TaskError::Schedule(_) => "InvalidSchedule",
            TaskError::Fatal(_) => "TargetUnavailable",
        }
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    /// Stopped by its owner.
    Cancelled,
    /// Stopped itself after surfacing the error on the resource.
    Failed(TaskError),
}

// =============================================================================
// Task
// =============================================================================

/// Dependencies shared by every task.
#[derive(Clone)]
pub struct TaskContext {
    pub converger: Arc<Converger>,
    pub status: Arc<dyn StatusReporter>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,

    /// Longest sleep between evaluations.
    pub safety_interval: Duration,

    /// Delay policy after a retryable convergence failure.
    pub retry: BackoffPolicy,
}

/// The scheduling loop for one resource.
pub struct ScheduleTask {
    id: ResourceId,
    spec: ScheduleSpec,
    spec_hash: SpecHash,
    ctx: TaskContext,

    /// Regime the target was last converged to; `None` until the first success.
    last_applied: Option<Regime>,

    /// Consecutive retryable failures.
    failures: u32,
}

impl ScheduleTask {
    pub fn new(id: ResourceId, spec: ScheduleSpec, ctx: TaskContext) -> Self {
        let spec_hash = spec.spec_hash();
        Self {
            id,
            spec,
            spec_hash,
            ctx,
            last_applied: None,
            failures: 0,
        }
    }

    /// Run until cancelled or until a schedule or fatal target error.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> TaskExit {
        info!(
            target_hpa = %self.spec.target,
            spec_hash = %self.spec_hash,
            "Schedule task started"
        );

        loop {
            if *cancel.borrow() {
                debug!("Schedule task cancelled");
                return TaskExit::Cancelled;
            }

            let now = self.ctx.clock.now();
            let evaluation = match evaluate(&self.spec, now) {
                Ok(evaluation) => evaluation,
                Err(e) => return self.fail(TaskError::Schedule(e), now).await,
            };
            let regime = evaluation.regime;
            let mut wake = evaluation.wake_after(now, self.ctx.safety_interval);

            if self.last_applied != Some(regime) {
                let window = self.spec.window_for(regime);
                let observed = tokio::select! {
                    biased;

                    _ = cancelled(&mut cancel) => {
                        debug!("Schedule task cancelled while reading target");
                        return TaskExit::Cancelled;
                    }

                    observed = self.ctx.converger.observe(&self.spec.target) => observed,
                };

                // A started write finishes with its audit event. Cancellation
                // is seen on the next iteration.
                let result = match observed {
                    Ok(current) => {
                        self.ctx
                            .converger
                            .converge_from(&self.id, &self.spec.target, regime, window, current, now)
                            .await
                    }
                    Err(e) => Err(e),
                };

                match result {
                    Ok(outcome) => {
                        self.failures = 0;
                        self.last_applied = Some(regime);
                        debug!(regime = %regime, applied = outcome.is_applied(), "Regime converged");
                        self.report_regime(regime).await;
                    }
                    Err(ConvergeError::Retryable(e)) => {
                        let delay = self.ctx.retry.delay(self.failures);
                        self.failures = self.failures.saturating_add(1);
                        warn!(
                            regime = %regime,
                            error = %e,
                            attempt = self.failures,
                            retry_in_ms = delay.as_millis() as u64,
                            "Convergence failed, will retry"
                        );
                        wake = wake.min(delay);
                    }
                    Err(ConvergeError::Fatal(e)) => {
                        return self.fail(TaskError::Fatal(e), now).await;
                    }
                }
            }

            debug!(
                regime = %regime,
                next_boundary = %evaluation.next_boundary,
                wake_ms = wake.as_millis() as u64,
                "Sleeping until next evaluation"
            );

            tokio::select! {
                biased;

                _ = cancelled(&mut cancel) => {
                    debug!("Schedule task cancelled while sleeping");
                    return TaskExit::Cancelled;
                }

                _ = tokio::time::sleep(wake) => {}
            }
        }
    }

    async fn report_regime(&self, regime: Regime) {
        let status = HpaScalerStatus::running(self.spec_hash.as_str(), Some(regime.to_string()));
        if let Err(e) = self.ctx.status.report(&self.id, &status).await {
            warn!(error = %e, "Failed to report regime");
        }
    }

    /// Surface a terminal error on the resource and end the task.
    async fn fail(&self, err: TaskError, at: DateTime<Utc>) -> TaskExit {
        error!(target_hpa = %self.spec.target, error = %err, "Schedule task stopped");

        let status = HpaScalerStatus::stopped(Some(err.to_string()));
        if let Err(e) = self.ctx.status.report(&self.id, &status).await {
            warn!(error = %e, "Failed to report task failure");
        }

        let event = AuditEvent::builder()
            .kind(EventKind::SchedulingFailed)
            .reason(err.reason())
            .resource(self.id.clone())
            .message(format!("Stopped scheduling {}: {}", self.spec.target, err))
            .occurred_at(at)
            .build();
        match event {
            Ok(event) => {
                if let Err(e) = self.ctx.audit.record(&event).await {
                    warn!(error = %e, "Failed to record scheduling failure");
                }
            }
            Err(e) => warn!(error = %e, "Failed to build scheduling failure event"),
        }

        TaskExit::Failed(err)
    }
}

/// Resolves once cancellation is requested or the owner is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|c| *c).await;
}

// =============================================================================
// Tests
// =============================================================================
