//! Cron window evaluation.
//!
//! Two independent cron expressions delimit the scale-up window: the most
//! recent `start` fire opens it and the most recent `end` fire closes it.
//! Whichever of the two fired last decides the regime, so overlapping or
//! skipped fires resolve without special cases.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use cron::Schedule;
use thiserror::Error;

use crate::{Regime, ScheduleSpec};

/// Errors raised while evaluating a schedule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The expression has neither five nor six fields.
    #[error("cron expression '{expression}' has {count} fields, expected 5 or 6")]
    FieldCount { expression: String, count: usize },

    /// The expression could not be parsed.
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    /// The expression never fires after the reference time.
    #[error("cron expression '{expression}' has no occurrence after {after}")]
    NoFutureOccurrence {
        expression: String,
        after: DateTime<Utc>,
    },
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Regime active at the reference time.
    pub regime: Regime,

    /// Earliest `start` or `end` fire strictly after the reference time.
    pub next_boundary: DateTime<Utc>,

    /// The fire that decided the regime, if either trigger has fired.
    pub last_trigger: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// How long to sleep from `now`: until the next boundary, capped at `ceiling`.
    pub fn wake_after(&self, now: DateTime<Utc>, ceiling: Duration) -> Duration {
        let until_boundary = (self.next_boundary - now).to_std().unwrap_or(Duration::ZERO);
        until_boundary.min(ceiling)
    }
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires a leading seconds field; standard crontab
/// syntax does not carry one.
pub fn normalize_cron(expression: &str) -> Result<String, ScheduleError> {
    let trimmed = expression.trim();
    match trimmed.split_whitespace().count() {
        5 => Ok(format!("0 {}", trimmed)),
        6 => Ok(trimmed.to_string()),
        count => Err(ScheduleError::FieldCount {
            expression: expression.to_string(),
            count,
        }),
    }
}

/// Parse a five- or six-field cron expression.
pub fn parse_cron(expression: &str) -> Result<Schedule, ScheduleError> {
    let normalized = normalize_cron(expression)?;
    Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

/// Decide the regime at `now` and the next time it may change.
pub fn evaluate(spec: &ScheduleSpec, now: DateTime<Utc>) -> Result<Evaluation, ScheduleError> {
    let start = parse_cron(&spec.start.cron_expression)?;
    let end = parse_cron(&spec.end.cron_expression)?;

    let last_start = last_at_or_before(&start, now);
    let last_end = last_at_or_before(&end, now);

    let (regime, last_trigger) = match (last_start, last_end) {
        (Some(s), Some(e)) if s >= e => (Regime::ScaleUp, Some(s)),
        (Some(_), Some(e)) => (Regime::ScaleDown, Some(e)),
        (Some(s), None) => (Regime::ScaleUp, Some(s)),
        (None, Some(e)) => (Regime::ScaleDown, Some(e)),
        (None, None) => (Regime::ScaleDown, None),
    };

    let next_start = next_after(&start, now).ok_or_else(|| ScheduleError::NoFutureOccurrence {
        expression: spec.start.cron_expression.clone(),
        after: now,
    })?;
    let next_end = next_after(&end, now).ok_or_else(|| ScheduleError::NoFutureOccurrence {
        expression: spec.end.cron_expression.clone(),
        after: now,
    })?;

    Ok(Evaluation {
        regime,
        next_boundary: next_start.min(next_end),
        last_trigger,
    })
}

/// Most recent fire at or before `now`.
fn last_at_or_before(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    // Fires land on whole seconds; probing from the next whole second makes
    // a fire exactly at `now` visible to the backwards search.
    let whole = now.duration_trunc(TimeDelta::seconds(1)).unwrap_or(now);
    let probe = whole + TimeDelta::seconds(1);
    schedule.after(&probe).rev().find(|t| *t <= now)
}

/// First fire strictly after `now`.
fn next_after(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&now).find(|t| *t > now)
}
