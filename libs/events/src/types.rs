//! Event kind definitions.

use serde::{Deserialize, Serialize};

/// Severity of an event, mirroring the Kubernetes event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventType {
    #[default]
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// What an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Bounds were patched to the scale-up window.
    ScalingUpScheduled,
    /// Bounds were patched to the scale-down window.
    ScalingDownScheduled,
    /// A scheduling task started for the resource.
    Initialization,
    /// The scheduling task for the resource was removed.
    Finalization,
    /// The resource spec failed validation; no task runs.
    ConfigurationRejected,
    /// The scheduling task stopped on a schedule or target error.
    SchedulingFailed,
}

impl EventKind {
    /// Short machine-readable reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            EventKind::ScalingUpScheduled => "ScalingUp",
            EventKind::ScalingDownScheduled => "ScalingDown",
            EventKind::Initialization => "Initialization",
            EventKind::Finalization => "Finalization",
            EventKind::ConfigurationRejected => "InvalidSpec",
            EventKind::SchedulingFailed => "SchedulingStopped",
        }
    }

    /// Severity for this kind.
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::ConfigurationRejected | EventKind::SchedulingFailed => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    /// Action verb reported alongside the reason.
    pub fn action(&self) -> &'static str {
        match self {
            EventKind::ScalingUpScheduled | EventKind::ScalingDownScheduled => "Scale",
            EventKind::Initialization | EventKind::Finalization => "Configure",
            EventKind::ConfigurationRejected => "Validate",
            EventKind::SchedulingFailed => "Schedule",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::ScalingUpScheduled => "ScalingUpScheduled",
            EventKind::ScalingDownScheduled => "ScalingDownScheduled",
            EventKind::Initialization => "Initialization",
            EventKind::Finalization => "Finalization",
            EventKind::ConfigurationRejected => "ConfigurationRejected",
            EventKind::SchedulingFailed => "SchedulingFailed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_match_kinds() {
        assert_eq!(EventKind::ScalingUpScheduled.reason(), "ScalingUp");
        assert_eq!(EventKind::ScalingDownScheduled.reason(), "ScalingDown");
        assert_eq!(EventKind::Initialization.reason(), "Initialization");
    }

    #[test]
    fn test_failures_are_warnings() {
        assert_eq!(
            EventKind::ConfigurationRejected.event_type(),
            EventType::Warning
        );
        assert_eq!(EventKind::SchedulingFailed.event_type(), EventType::Warning);
        assert_eq!(EventKind::ScalingUpScheduled.event_type(), EventType::Normal);
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&EventKind::ScalingDownScheduled).unwrap(),
            "\"ScalingDownScheduled\""
        );
        assert_eq!(EventKind::Finalization.to_string(), "Finalization");
    }
}
