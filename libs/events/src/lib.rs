//! # hpascale-events
//!
//! Audit event records for the hpascale operator.
//!
//! ## Design Principles
//!
//! - Events are immutable records of decisions the operator acted on
//! - Every event belongs to exactly one watched resource
//! - No event is produced for a tick that changed nothing
//!
//! ## Event Record
//!
//! All events share one record shape:
//! - What happened (`kind`, `reason`, `event_type`, `action`)
//! - Where (`resource`, the watched `HpaScaler`)
//! - When (`occurred_at`, the decision time)
//! - A human-readable `message`
//!
//! ## Event Kinds
//!
//! - Scaling decisions (`ScalingUpScheduled`, `ScalingDownScheduled`)
//! - Lifecycle (`Initialization`, `Finalization`)
//! - Failures (`ConfigurationRejected`, `SchedulingFailed`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
