//! In-memory collaborators for tests and local development.
//!
//! Each fake records what it was asked to do so tests can assert on writes,
//! events and status transitions without a cluster.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hpascale_events::{AuditEvent, EventError, EventKind};
use hpascale_id::{ResourceId, TargetRef};
use hpascale_reconcile::ReplicaBounds;

use crate::client::{AuditSink, AutoscalerClient, ClientError, StatusReporter};
use crate::clock::Clock;
use crate::crd::HpaScalerStatus;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Autoscaler
// =============================================================================

#[derive(Default)]
struct AutoscalerState {
    targets: HashMap<TargetRef, ReplicaBounds>,
    patches: Vec<(TargetRef, ReplicaBounds)>,
    get_failures: VecDeque<ClientError>,
    patch_failures: VecDeque<ClientError>,
    get_delay: Option<Duration>,
}

/// Autoscaler API backed by a map.
#[derive(Default)]
pub struct FakeAutoscaler {
    state: Mutex<AutoscalerState>,
}

impl FakeAutoscaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a target with its current bounds.
    pub fn with_target(self, target: TargetRef, bounds: ReplicaBounds) -> Self {
        self.insert(target, bounds);
        self
    }

    pub fn insert(&self, target: TargetRef, bounds: ReplicaBounds) {
        lock(&self.state).targets.insert(target, bounds);
    }

    pub fn remove(&self, target: &TargetRef) {
        lock(&self.state).targets.remove(target);
    }

    pub fn bounds(&self, target: &TargetRef) -> Option<ReplicaBounds> {
        lock(&self.state).targets.get(target).copied()
    }

    /// Successful patches, in order.
    pub fn patches(&self) -> Vec<(TargetRef, ReplicaBounds)> {
        lock(&self.state).patches.clone()
    }

    pub fn patch_count(&self) -> usize {
        lock(&self.state).patches.len()
    }

    /// Fail the next read with `err`.
    pub fn fail_next_get(&self, err: ClientError) {
        lock(&self.state).get_failures.push_back(err);
    }

    /// Fail the next patch with `err`.
    pub fn fail_next_patch(&self, err: ClientError) {
        lock(&self.state).patch_failures.push_back(err);
    }

    /// Make every read take `delay` (virtual time under a paused runtime).
    pub fn set_get_delay(&self, delay: Duration) {
        lock(&self.state).get_delay = Some(delay);
    }
}

#[async_trait]
impl AutoscalerClient for FakeAutoscaler {
    async fn get_bounds(&self, target: &TargetRef) -> Result<ReplicaBounds, ClientError> {
        let delay = lock(&self.state).get_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if let Some(err) = state.get_failures.pop_front() {
            return Err(err);
        }
        state
            .targets
            .get(target)
            .copied()
            .ok_or_else(|| ClientError::NotFound(target.to_string()))
    }

    async fn patch_bounds(
        &self,
        target: &TargetRef,
        bounds: ReplicaBounds,
    ) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.patch_failures.pop_front() {
            return Err(err);
        }
        let Some(current) = state.targets.get_mut(target) else {
            return Err(ClientError::NotFound(target.to_string()));
        };
        *current = bounds;
        state.patches.push((target.clone(), bounds));
        Ok(())
    }
}

// =============================================================================
// Audit
// =============================================================================

/// Audit sink that keeps every event.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    failing: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        lock(&self.events).iter().filter(|e| e.kind == kind).count()
    }

    /// Reject every subsequent event.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    /// Make every record take `delay` before the event is kept.
    pub fn set_record_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), EventError> {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.failing) {
            return Err(EventError::Sink("sink configured to fail".to_string()));
        }
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status reporter that keeps the full write history per resource.
#[derive(Default)]
pub struct RecordingStatus {
    writes: Mutex<HashMap<ResourceId, Vec<HpaScalerStatus>>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent status written for `id`.
    pub fn latest(&self, id: &ResourceId) -> Option<HpaScalerStatus> {
        lock(&self.writes).get(id).and_then(|w| w.last().cloned())
    }

    /// Every status written for `id`, oldest first.
    pub fn history(&self, id: &ResourceId) -> Vec<HpaScalerStatus> {
        lock(&self.writes).get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl StatusReporter for RecordingStatus {
    async fn report(&self, id: &ResourceId, status: &HpaScalerStatus) -> Result<(), ClientError> {
        lock(&self.writes)
            .entry(id.clone())
            .or_default()
            .push(status.clone());
        Ok(())
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Wall clock that advances with tokio's clock.
///
/// Under `#[tokio::test(start_paused = true)]` the runtime skips idle sleeps,
/// so a task sleeping until a cron boundary wakes with this clock reading
/// exactly that boundary.
pub struct FakeClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl FakeClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.origin);
        self.base + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::MAX)
    }
}
