//! Schedule window evaluation and convergence primitives.
//!
//! This library holds the pure part of the operator: given a pair of
//! recurring windows and a reference time, decide which scaling regime is
//! active and when the next regime boundary falls. Key concepts:
//!
//! - **Window**: a cron trigger paired with the replica bounds it applies.
//! - **Regime**: the active scaling intent (scale-up or scale-down).
//! - **Convergence**: bringing the target's bounds to the regime's bounds.
//!
//! # Invariants
//!
//! - Evaluation is deterministic and pure given the same inputs
//! - The most recently fired trigger decides the regime
//! - A clock exactly on a boundary is already inside the new regime

use std::time::Duration;

use hpascale_id::TargetRef;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

mod window;

pub use window::{evaluate, normalize_cron, parse_cron, Evaluation, ScheduleError};

/// Spec validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// The window's cron expression cannot be used.
    #[error("{window} window: {source}")]
    Schedule {
        window: &'static str,
        #[source]
        source: ScheduleError,
    },

    /// Negative lower bound.
    #[error("{window} window: minReplicas must be non-negative, got {min}")]
    NegativeMin { window: &'static str, min: i32 },

    /// Lower bound above upper bound.
    #[error("{window} window: minReplicas ({min}) exceeds maxReplicas ({max})")]
    MinExceedsMax {
        window: &'static str,
        min: i32,
        max: i32,
    },
}

/// The `minReplicas`/`maxReplicas` pair on an autoscaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaBounds {
    pub min_replicas: i32,
    pub max_replicas: i32,
}

impl ReplicaBounds {
    pub fn new(min_replicas: i32, max_replicas: i32) -> Self {
        Self {
            min_replicas,
            max_replicas,
        }
    }
}

impl std::fmt::Display for ReplicaBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "min={} max={}", self.min_replicas, self.max_replicas)
    }
}

/// One recurring trigger point and the bounds to apply when its regime is active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub cron_expression: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
}

impl Window {
    pub fn new(cron_expression: impl Into<String>, min_replicas: i32, max_replicas: i32) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            min_replicas,
            max_replicas,
        }
    }

    /// The bounds this window applies.
    pub fn bounds(&self) -> ReplicaBounds {
        ReplicaBounds::new(self.min_replicas, self.max_replicas)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cronExpression": self.cron_expression,
            "minReplicas": self.min_replicas,
            "maxReplicas": self.max_replicas,
        })
    }

    fn validate(&self, window: &'static str) -> Result<(), SpecError> {
        parse_cron(&self.cron_expression)
            .map_err(|source| SpecError::Schedule { window, source })?;

        if self.min_replicas < 0 {
            return Err(SpecError::NegativeMin {
                window,
                min: self.min_replicas,
            });
        }

        if self.min_replicas > self.max_replicas {
            return Err(SpecError::MinExceedsMax {
                window,
                min: self.min_replicas,
                max: self.max_replicas,
            });
        }

        Ok(())
    }
}

/// A validated scaling schedule for one autoscaler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub target: TargetRef,
    pub start: Window,
    pub end: Window,
}

impl ScheduleSpec {
    /// Build a spec, validating both windows.
    pub fn new(target: TargetRef, start: Window, end: Window) -> Result<Self, SpecError> {
        start.validate("start")?;
        end.validate("end")?;
        Ok(Self { target, start, end })
    }

    /// The window whose bounds apply under `regime`.
    pub fn window_for(&self, regime: Regime) -> &Window {
        match regime {
            Regime::ScaleUp => &self.start,
            Regime::ScaleDown => &self.end,
        }
    }

    /// Content hash of the spec, stable across field order.
    pub fn spec_hash(&self) -> SpecHash {
        SpecHash::from_json(&serde_json::json!({
            "target": self.target.to_string(),
            "start": self.start.to_json(),
            "end": self.end.to_json(),
        }))
    }
}

/// The active scaling intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    /// Inside the window opened by the start trigger.
    ScaleUp,
    /// Outside it, after the end trigger.
    ScaleDown,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::ScaleUp => write!(f, "ScaleUp"),
            Regime::ScaleDown => write!(f, "ScaleDown"),
        }
    }
}

/// Result of a convergence attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The target was patched to these bounds.
    Applied(ReplicaBounds),

    /// The target already had the desired bounds.
    NoOp,
}

impl ApplyOutcome {
    /// Returns true if a write was issued.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// A spec hash for deterministic comparison.
///
/// Surfaced on status so consumers can tell which spec a task runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Compute a spec hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", serde_json::Value::from(k.as_str()), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// Default ceiling on how long a task sleeps between evaluations.
pub const DEFAULT_SAFETY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default base delay before retrying a failed convergence.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Default cap on the retry delay.
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(60);
