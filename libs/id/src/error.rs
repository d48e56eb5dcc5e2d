//! Error types for key parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating object keys.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// A key part is empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The key is missing the `/` separator.
    #[error("key missing '/' separator: '{0}'")]
    MissingSeparator(String),

    /// A key part exceeds its maximum length.
    #[error("{field} too long: max {max} characters, got {actual}")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// A key part contains a character outside the DNS-1123 alphabet.
    #[error("{field} contains invalid character '{found}'")]
    InvalidCharacter { field: &'static str, found: char },

    /// The key format is invalid.
    #[error("invalid key format: {message}")]
    InvalidFormat { message: String },
}
