//! hpascale operator library
//!
//! Drives the `minReplicas`/`maxReplicas` of HorizontalPodAutoscalers from
//! pairs of cron-scheduled windows declared in `HpaScaler` resources.
//!
//! ## Architecture
//!
//! ```text
//! watch ──▶ EventRouter ──▶ Handlers ──▶ TaskManager
//!                                          └── ScheduleTask(resource)
//!                                                ├── evaluate (cron window)
//!                                                └── Converger (patch + event)
//! ```
//!
//! ## Modules
//!
//! - `controller`: watch loop and relist handling
//! - `handlers`: spec validation and dispatch
//! - `manager`: one scheduling task per resource
//! - `task`: the per-resource evaluate/converge/sleep loop
//! - `converge`: the idempotent convergence action
//! - `client`: seams to the API server, with kube and in-memory implementations

pub mod client;
pub mod clock;
pub mod config;
pub mod controller;
pub mod converge;
pub mod crd;
pub mod fake;
pub mod handlers;
pub mod kube_client;
pub mod manager;
pub mod task;

pub use client::{AuditSink, AutoscalerClient, ClientError, StatusReporter};
pub use converge::{ConvergeError, Converger};
pub use crd::{HpaScaler, HpaScalerSpec, HpaScalerStatus, WindowSpec};
pub use handlers::{Handlers, ValidationError};
pub use manager::{ManagerConfig, ManagerStats, TaskManager, Transition};
pub use task::{BackoffPolicy, TaskError, TaskExit};
