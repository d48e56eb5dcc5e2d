//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when building or publishing events.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// A required field was not set on the builder.
    #[error("missing required event field: {0}")]
    MissingField(&'static str),

    /// The sink rejected or failed to store the event.
    #[error("event sink error: {0}")]
    Sink(String),
}
