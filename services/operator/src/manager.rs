//! Task manager - owns one scheduling task per watched resource.
//!
//! ## Per-resource state machine
//!
//! ```text
//! Absent ──create/update──▶ Running ──update(changed)──▶ Replacing ──▶ Running
//!                              │
//!                              └──────delete──────▶ Absent
//! ```
//!
//! ## Serialization
//!
//! Every notification for a resource runs while holding that resource's slot
//! lock, so a replace in progress cannot interleave with a delete for the same
//! identity. The map lock is only held long enough to fetch or insert a slot;
//! tasks never take either lock. A deleted slot is marked retired before it
//! leaves the map, and callers that raced onto a retired slot start over.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hpascale_events::{AuditEvent, EventKind};
use hpascale_id::ResourceId;
use hpascale_reconcile::{ScheduleSpec, DEFAULT_SAFETY_INTERVAL};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::client::{AuditSink, AutoscalerClient, StatusReporter};
use crate::clock::Clock;
use crate::converge::Converger;
use crate::crd::HpaScalerStatus;
use crate::task::{BackoffPolicy, ScheduleTask, TaskContext, TaskExit};

/// Settings shared by every task the manager spawns.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Longest a task sleeps between evaluations.
    pub safety_interval: Duration,

    /// Retry delays after a retryable convergence failure.
    pub retry: BackoffPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            safety_interval: DEFAULT_SAFETY_INTERVAL,
            retry: BackoffPolicy::default(),
        }
    }
}

/// What a notification did to a resource's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A task was spawned for a previously untracked resource.
    Started,
    /// The running task was cancelled and a new one spawned.
    Replaced,
    /// The spec matched the running task's spec.
    Unchanged,
    /// A create arrived for a resource that already has a task.
    Duplicate,
    /// The task was cancelled and the resource forgotten.
    Stopped,
    /// Nothing was tracked for the resource.
    Absent,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub spawned: u64,
    pub cancelled: u64,
}

struct RunningTask {
    spec: ScheduleSpec,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<TaskExit>,
}

impl RunningTask {
    /// Signal cancellation and wait for the task to finish.
    async fn stop(self, id: &ResourceId) -> Option<TaskExit> {
        let _ = self.cancel.send(true);
        match self.handle.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!(resource = %id, error = %e, "Schedule task did not finish cleanly");
                None
            }
        }
    }
}

#[derive(Default)]
struct Slot {
    task: Option<RunningTask>,

    /// Whether the Initialization event was already emitted for this slot.
    announced: bool,

    /// Set once the slot has left the map.
    retired: bool,
}

/// Owns the mapping from resource identity to its scheduling task.
pub struct TaskManager {
    ctx: TaskContext,
    slots: Mutex<HashMap<ResourceId, Arc<Mutex<Slot>>>>,
    spawned: AtomicU64,
    cancelled: AtomicU64,
}

impl TaskManager {
    /// Create a manager with injected collaborators.
    pub fn new(
        config: ManagerConfig,
        client: Arc<dyn AutoscalerClient>,
        status: Arc<dyn StatusReporter>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ctx = TaskContext {
            converger: Arc::new(Converger::new(client, audit.clone())),
            status,
            audit,
            clock,
            safety_interval: config.safety_interval,
            retry: config.retry,
        };

        Self {
            ctx,
            slots: Mutex::new(HashMap::new()),
            spawned: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Start a task for a newly observed resource.
    pub async fn on_create(&self, id: &ResourceId, spec: ScheduleSpec) -> Transition {
        let mut slot = self.lock_slot(id).await;

        if slot.task.is_some() {
            warn!(resource = %id, "Create for a resource that already has a task, ignoring");
            return Transition::Duplicate;
        }

        self.spawn(&mut slot, id, spec).await;
        Transition::Started
    }

    /// Apply a possibly changed spec.
    ///
    /// Returns only after any replaced task has fully stopped.
    pub async fn on_update(&self, id: &ResourceId, spec: ScheduleSpec) -> Transition {
        let mut slot = self.lock_slot(id).await;

        let Some(running) = slot.task.take() else {
            self.spawn(&mut slot, id, spec).await;
            return Transition::Started;
        };

        if running.spec == spec {
            slot.task = Some(running);
            debug!(resource = %id, "Spec unchanged, keeping task");
            return Transition::Unchanged;
        }

        info!(resource = %id, "Spec changed, replacing task");
        self.stop_task(id, running).await;
        self.spawn(&mut slot, id, spec).await;
        Transition::Replaced
    }

    /// Cancel the resource's task and forget it.
    ///
    /// Returns only after the task has fully stopped.
    pub async fn on_delete(&self, id: &ResourceId) -> Transition {
        let mut slot = self.lock_slot(id).await;

        let transition = match slot.task.take() {
            Some(running) => {
                let target = running.spec.target.clone();
                self.stop_task(id, running).await;

                self.report(id, &HpaScalerStatus::stopped(None)).await;
                self.record(
                    EventKind::Finalization,
                    id,
                    format!("Scaling configuration removed for {target}"),
                    self.ctx.clock.now(),
                )
                .await;

                info!(resource = %id, "Resource task removed");
                Transition::Stopped
            }
            None => {
                debug!(resource = %id, "Delete for untracked resource, ignoring");
                Transition::Absent
            }
        };

        slot.retired = true;
        let mut slots = self.slots.lock().await;
        if slots
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, OwnedMutexGuard::mutex(&slot)))
        {
            slots.remove(id);
        }
        transition
    }

    /// Cancel and await every task. Status is left as is.
    pub async fn shutdown(&self) {
        let slots: Vec<_> = self.slots.lock().await.drain().collect();
        info!(count = slots.len(), "Stopping all schedule tasks");

        for (id, slot) in slots {
            let mut slot = slot.lock().await;
            slot.retired = true;
            if let Some(running) = slot.task.take() {
                self.stop_task(&id, running).await;
            }
        }
    }

    /// Identities that currently own a task, sorted.
    pub async fn tracked(&self) -> Vec<ResourceId> {
        let slots: Vec<_> = self
            .slots
            .lock()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut tracked = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            if slot.lock().await.task.is_some() {
                tracked.push(id);
            }
        }
        tracked.sort();
        tracked
    }

    /// True while the resource's task is still looping.
    pub async fn is_running(&self, id: &ResourceId) -> bool {
        let slot = self.slots.lock().await.get(id).cloned();
        match slot {
            Some(slot) => slot
                .lock()
                .await
                .task
                .as_ref()
                .is_some_and(|t| !t.handle.is_finished()),
            None => false,
        }
    }

    /// Spec of the resource's current task, if any.
    pub async fn current_spec(&self, id: &ResourceId) -> Option<ScheduleSpec> {
        let slot = self.slots.lock().await.get(id).cloned()?;
        let slot = slot.lock().await;
        slot.task.as_ref().map(|t| t.spec.clone())
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            spawned: self.spawned.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    async fn lock_slot(&self, id: &ResourceId) -> OwnedMutexGuard<Slot> {
        loop {
            let slot = {
                let mut slots = self.slots.lock().await;
                slots.entry(id.clone()).or_default().clone()
            };
            let guard = slot.lock_owned().await;
            if !guard.retired {
                return guard;
            }
        }
    }

    async fn spawn(&self, slot: &mut Slot, id: &ResourceId, spec: ScheduleSpec) {
        // Written before the task starts so its regime report cannot be overwritten.
        let status = HpaScalerStatus::running(spec.spec_hash().as_str(), None);
        self.report(id, &status).await;

        let (cancel, cancel_rx) = watch::channel(false);
        let task = ScheduleTask::new(id.clone(), spec.clone(), self.ctx.clone());
        let handle = tokio::spawn(
            task.run(cancel_rx)
                .instrument(info_span!("schedule_task", resource = %id)),
        );
        self.spawned.fetch_add(1, Ordering::Relaxed);

        if !slot.announced {
            slot.announced = true;
            self.record(
                EventKind::Initialization,
                id,
                format!("Scaling configuration added for {}", spec.target),
                self.ctx.clock.now(),
            )
            .await;
        }

        info!(resource = %id, target_hpa = %spec.target, "Spawned schedule task");
        slot.task = Some(RunningTask {
            spec,
            cancel,
            handle,
        });
    }

    async fn stop_task(&self, id: &ResourceId, running: RunningTask) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
        let exit = running.stop(id).await;
        debug!(resource = %id, exit = ?exit, "Schedule task stopped");
    }

    async fn report(&self, id: &ResourceId, status: &HpaScalerStatus) {
        if let Err(e) = self.ctx.status.report(id, status).await {
            warn!(resource = %id, error = %e, "Failed to write status");
        }
    }

    async fn record(&self, kind: EventKind, id: &ResourceId, message: String, at: DateTime<Utc>) {
        let event = AuditEvent::new(kind, id.clone(), message, at);
        if let Err(e) = self.ctx.audit.record(&event).await {
            warn!(resource = %id, kind = %kind, error = %e, "Failed to record event");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeAutoscaler, FakeClock, RecordingAuditSink, RecordingStatus};
    use chrono::TimeZone;
    use hpascale_id::TargetRef;
    use hpascale_reconcile::{ReplicaBounds, Window};

    fn id() -> ResourceId {
        ResourceId::new("payments", "nightly-scaler").unwrap()
    }

    fn target() -> TargetRef {
        TargetRef::new("payments", "api-hpa").unwrap()
    }

    fn spec(start: &str) -> ScheduleSpec {
        ScheduleSpec::new(
            target(),
            Window::new(start, 5, 10),
            Window::new("0 20 * * *", 1, 3),
        )
        .unwrap()
    }

    fn manager() -> (
        TaskManager,
        Arc<FakeAutoscaler>,
        Arc<RecordingStatus>,
        Arc<RecordingAuditSink>,
    ) {
        let client = Arc::new(FakeAutoscaler::new().with_target(target(), ReplicaBounds::new(1, 3)));
        let status = Arc::new(RecordingStatus::new());
        let audit = Arc::new(RecordingAuditSink::new());
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap(),
        ));
        let manager = TaskManager::new(
            ManagerConfig::default(),
            client.clone(),
            status.clone(),
            audit.clone(),
            clock,
        );
        (manager, client, status, audit)
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_starts_task_once() {
        let (manager, _, status, audit) = manager();

        assert_eq!(manager.on_create(&id(), spec("0 8 * * *")).await, Transition::Started);
        assert_eq!(manager.on_create(&id(), spec("0 8 * * *")).await, Transition::Duplicate);

        assert!(manager.is_running(&id()).await);
        assert_eq!(manager.tracked().await, vec![id()]);
        assert_eq!(manager.stats(), ManagerStats { spawned: 1, cancelled: 0 });
        assert_eq!(audit.count(EventKind::Initialization), 1);
        assert!(status.history(&id())[0].initialized);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_with_same_spec_keeps_task() {
        let (manager, _, _, _) = manager();

        manager.on_create(&id(), spec("0 8 * * *")).await;
        for _ in 0..3 {
            assert_eq!(manager.on_update(&id(), spec("0 8 * * *")).await, Transition::Unchanged);
        }

        assert_eq!(manager.stats(), ManagerStats { spawned: 1, cancelled: 0 });
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_with_changed_spec_replaces_task() {
        let (manager, client, _, audit) = manager();

        manager.on_create(&id(), spec("0 8 * * *")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.bounds(&target()), Some(ReplicaBounds::new(5, 10)));

        // Start moves to 10:00, so at 09:00 the last fire is yesterday's end.
        let transition = manager.on_update(&id(), spec("0 10 * * *")).await;
        assert_eq!(transition, Transition::Replaced);
        assert_eq!(manager.stats(), ManagerStats { spawned: 2, cancelled: 1 });
        assert_eq!(manager.current_spec(&id()).await, Some(spec("0 10 * * *")));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.bounds(&target()), Some(ReplicaBounds::new(1, 3)));
        assert_eq!(audit.count(EventKind::Initialization), 1);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_on_absent_identity_creates() {
        let (manager, _, _, _) = manager();

        assert_eq!(manager.on_update(&id(), spec("0 8 * * *")).await, Transition::Started);
        assert!(manager.is_running(&id()).await);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_stops_and_forgets() {
        let (manager, _, status, audit) = manager();

        manager.on_create(&id(), spec("0 8 * * *")).await;
        assert_eq!(manager.on_delete(&id()).await, Transition::Stopped);
        assert_eq!(manager.on_delete(&id()).await, Transition::Absent);

        assert!(manager.tracked().await.is_empty());
        assert!(!manager.is_running(&id()).await);
        assert_eq!(manager.stats(), ManagerStats { spawned: 1, cancelled: 1 });
        assert!(!status.latest(&id()).unwrap().initialized);
        assert_eq!(audit.count(EventKind::Finalization), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recreate_after_delete_announces_again() {
        let (manager, _, _, audit) = manager();

        manager.on_create(&id(), spec("0 8 * * *")).await;
        manager.on_delete(&id()).await;
        assert_eq!(manager.on_create(&id(), spec("0 8 * * *")).await, Transition::Started);

        assert_eq!(audit.count(EventKind::Initialization), 2);
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_task_stays_tracked() {
        let (manager, client, status, _) = manager();
        client.remove(&target());

        manager.on_create(&id(), spec("0 8 * * *")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!manager.is_running(&id()).await);
        assert_eq!(manager.tracked().await, vec![id()]);
        let latest = status.latest(&id()).unwrap();
        assert!(!latest.initialized);
        assert!(latest.error.is_some());

        // Same spec does not revive it; a changed one does.
        assert_eq!(manager.on_update(&id(), spec("0 8 * * *")).await, Transition::Unchanged);
        client.insert(target(), ReplicaBounds::new(1, 3));
        assert_eq!(manager.on_update(&id(), spec("30 8 * * *")).await, Transition::Replaced);
        assert!(manager.is_running(&id()).await);

        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_notifications_leave_consistent_state() {
        let (manager, _, _, _) = manager();
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for round in 0..20 {
            let id = ResourceId::new("payments", format!("scaler-{}", round % 4)).unwrap();
            let m = manager.clone();
            handles.push(tokio::spawn(async move {
                match round % 3 {
                    0 => {
                        m.on_create(&id, spec("0 8 * * *")).await;
                    }
                    1 => {
                        m.on_update(&id, spec("0 9 * * *")).await;
                    }
                    _ => {
                        m.on_delete(&id).await;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = manager.stats();
        let tracked = manager.tracked().await;
        assert_eq!((stats.spawned - stats.cancelled) as usize, tracked.len());
        for id in &tracked {
            assert!(manager.is_running(id).await);
        }

        manager.shutdown().await;
        assert!(manager.tracked().await.is_empty());
    }
}
