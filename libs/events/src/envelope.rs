//! Audit event record - the single shape every emitted event takes.

use chrono::{DateTime, Utc};
use hpascale_id::ResourceId;
use serde::{Deserialize, Serialize};

use crate::{EventError, EventKind, EventType};

/// One audit record for a decision taken on a watched resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened.
    pub kind: EventKind,

    /// Severity.
    pub event_type: EventType,

    /// Short machine-readable reason.
    pub reason: String,

    /// Action verb.
    pub action: String,

    /// Human-readable description including the applied bounds, if any.
    pub message: String,

    /// The watched resource this event belongs to.
    pub resource: ResourceId,

    /// Decision time.
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates an event whose reason, type and action derive from `kind`.
    pub fn new(
        kind: EventKind,
        resource: ResourceId,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            event_type: kind.event_type(),
            reason: kind.reason().to_string(),
            action: kind.action().to_string(),
            message: message.into(),
            resource,
            occurred_at,
        }
    }

    /// Creates a new event builder.
    pub fn builder() -> AuditEventBuilder {
        AuditEventBuilder::new()
    }
}

/// Builder for events that override the defaults derived from the kind.
#[derive(Debug, Default)]
pub struct AuditEventBuilder {
    kind: Option<EventKind>,
    reason: Option<String>,
    message: Option<String>,
    resource: Option<ResourceId>,
    occurred_at: Option<DateTime<Utc>>,
}

impl AuditEventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn resource(mut self, resource: ResourceId) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn occurred_at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = Some(ts);
        self
    }

    /// Build the event, failing if kind, resource or message are missing.
    pub fn build(self) -> Result<AuditEvent, EventError> {
        let kind = self.kind.ok_or(EventError::MissingField("kind"))?;
        let resource = self.resource.ok_or(EventError::MissingField("resource"))?;
        let message = self.message.ok_or(EventError::MissingField("message"))?;

        let mut event = AuditEvent::new(
            kind,
            resource,
            message,
            self.occurred_at.unwrap_or_else(Utc::now),
        );
        if let Some(reason) = self.reason {
            event.reason = reason;
        }
        Ok(event)
    }
}
