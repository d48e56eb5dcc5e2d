//! Integration tests for watch event routing.
//!
//! These tests feed synthetic watcher events through the router:
//! - Apply/Delete drive tasks the same way as direct handler calls
//! - A relist removes tasks whose resources vanished while disconnected
//! - Invalid specs are surfaced once, not on every resync

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use hpascale_events::EventKind;
use hpascale_id::{ResourceId, TargetRef};
use hpascale_operator::controller::EventRouter;
use hpascale_operator::fake::{FakeAutoscaler, FakeClock, RecordingAuditSink, RecordingStatus};
use hpascale_operator::{
    Handlers, HpaScaler, HpaScalerSpec, ManagerConfig, TaskManager, WindowSpec,
};
use hpascale_reconcile::ReplicaBounds;
use kube::runtime::watcher::Event;

struct Env {
    status: Arc<RecordingStatus>,
    audit: Arc<RecordingAuditSink>,
    manager: Arc<TaskManager>,
    router: EventRouter,
}

fn env() -> Env {
    let client = Arc::new(FakeAutoscaler::new());
    for name in ["api-hpa", "worker-hpa", "batch-hpa"] {
        client.insert(
            TargetRef::new("payments", name).unwrap(),
            ReplicaBounds::new(1, 3),
        );
    }
    let status = Arc::new(RecordingStatus::new());
    let audit = Arc::new(RecordingAuditSink::new());
    let clock = Arc::new(FakeClock::new(
        Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap(),
    ));
    let manager = Arc::new(TaskManager::new(
        ManagerConfig::default(),
        client,
        status.clone(),
        audit.clone(),
        clock.clone(),
    ));
    let handlers = Arc::new(Handlers::new(
        manager.clone(),
        status.clone(),
        audit.clone(),
        clock,
    ));
    Env {
        status,
        audit,
        manager,
        router: EventRouter::new(handlers),
    }
}

fn scaler(name: &str, hpa: &str) -> HpaScaler {
    let window = |cron: &str, min, max| {
        Some(WindowSpec {
            cron_expression: Some(cron.to_string()),
            min_replicas: Some(min),
            max_replicas: Some(max),
        })
    };
    let mut obj = HpaScaler::new(
        name,
        HpaScalerSpec {
            namespace: Some("payments".to_string()),
            hpa_name: Some(hpa.to_string()),
            schedule_start: window("0 8 * * *", 5, 10),
            schedule_end: window("0 20 * * *", 1, 3),
        },
    );
    obj.metadata.namespace = Some("payments".to_string());
    obj
}

fn id(name: &str) -> ResourceId {
    ResourceId::new("payments", name).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_apply_and_delete_events() {
    let mut env = env();

    env.router.handle(Event::Apply(scaler("api", "api-hpa"))).await;
    env.router.handle(Event::Apply(scaler("worker", "worker-hpa"))).await;
    assert_eq!(env.manager.tracked().await, vec![id("api"), id("worker")]);

    env.router.handle(Event::Delete(scaler("api", "api-hpa"))).await;
    env.router.handle(Event::Delete(scaler("api", "api-hpa"))).await;
    assert_eq!(env.manager.tracked().await, vec![id("worker")]);

    env.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_relist_removes_vanished_resources() {
    let mut env = env();

    env.router.handle(Event::Apply(scaler("api", "api-hpa"))).await;
    env.router.handle(Event::Apply(scaler("worker", "worker-hpa"))).await;

    // Reconnect: "worker" was deleted while the watch was down and "batch" appeared.
    env.router.handle(Event::Init).await;
    env.router.handle(Event::InitApply(scaler("api", "api-hpa"))).await;
    env.router.handle(Event::InitApply(scaler("batch", "batch-hpa"))).await;
    assert_eq!(env.manager.tracked().await.len(), 3);

    env.router.handle(Event::InitDone).await;
    assert_eq!(env.manager.tracked().await, vec![id("api"), id("batch")]);
    assert!(!env.status.latest(&id("worker")).unwrap().initialized);
    assert_eq!(env.audit.count(EventKind::Finalization), 1);

    // The surviving task was not restarted by the relist.
    assert_eq!(env.manager.stats().cancelled, 1);
    assert_eq!(env.manager.stats().spawned, 3);

    env.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_spec_surfaced_once() {
    let mut env = env();
    let mut obj = scaler("api", "api-hpa");
    obj.spec.schedule_end = None;

    env.router.handle(Event::Apply(obj.clone())).await;
    assert!(env.manager.tracked().await.is_empty());

    let status = env.status.latest(&id("api")).unwrap();
    assert!(!status.initialized);
    assert!(status.error.as_deref().unwrap().contains("spec.scheduleEnd"));
    assert_eq!(env.audit.count(EventKind::ConfigurationRejected), 1);

    // The resync carries the status written above and changes nothing.
    obj.status = Some(status);
    env.router.handle(Event::Apply(obj.clone())).await;
    env.router.handle(Event::Apply(obj)).await;
    assert_eq!(env.status.history(&id("api")).len(), 1);
    assert_eq!(env.audit.count(EventKind::ConfigurationRejected), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_spec_starts_task() {
    let mut env = env();
    let mut broken = scaler("api", "api-hpa");
    broken.spec.schedule_start.as_mut().unwrap().min_replicas = Some(20);

    env.router.handle(Event::Apply(broken)).await;
    assert!(env.manager.tracked().await.is_empty());

    env.router.handle(Event::Apply(scaler("api", "api-hpa"))).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(env.manager.is_running(&id("api")).await);
    let status = env.status.latest(&id("api")).unwrap();
    assert!(status.initialized);
    assert!(status.error.is_none());

    env.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unaddressable_object_is_ignored() {
    let mut env = env();
    let mut obj = scaler("api", "api-hpa");
    obj.metadata.namespace = None;

    env.router.handle(Event::Apply(obj.clone())).await;
    env.router.handle(Event::Delete(obj)).await;

    assert!(env.manager.tracked().await.is_empty());
    assert!(env.audit.events().is_empty());
}
