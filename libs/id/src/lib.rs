//! # hpascale-id
//!
//! Typed object keys for the hpascale operator.
//!
//! ## Design Principles
//!
//! - Every key is a `(namespace, name)` pair with a canonical string form
//! - Both parts are validated as DNS-1123 labels/subdomains on construction
//! - Keys roundtrip through their string form (parse → format → parse)
//! - Keys are typed so a watched resource is never confused with its target
//!
//! ## Key Format
//!
//! All keys use the format `{namespace}/{name}`:
//! - `payments/nightly-scaler` (a watched `HpaScaler`)
//! - `payments/api-hpa` (the autoscaler it drives)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Maximum length of a namespace (DNS-1123 label).
pub const MAX_NAMESPACE_LEN: usize = 63;

/// Maximum length of an object name (DNS-1123 subdomain).
pub const MAX_NAME_LEN: usize = 253;

/// Validate a namespace as a DNS-1123 label.
pub fn validate_namespace(value: &str) -> Result<(), IdError> {
    validate_dns_part("namespace", value, MAX_NAMESPACE_LEN, false)
}

/// Validate an object name as a DNS-1123 subdomain.
pub fn validate_name(value: &str) -> Result<(), IdError> {
    validate_dns_part("name", value, MAX_NAME_LEN, true)
}

fn validate_dns_part(
    field: &'static str,
    value: &str,
    max_len: usize,
    allow_dots: bool,
) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty { field });
    }

    if value.len() > max_len {
        return Err(IdError::TooLong {
            field,
            max: max_len,
            actual: value.len(),
        });
    }

    let valid_char = |c: char| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || (allow_dots && c == '.')
    };
    if let Some(bad) = value.chars().find(|c| !valid_char(*c)) {
        return Err(IdError::InvalidCharacter { field, found: bad });
    }

    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(value.chars().next()) || !edge_ok(value.chars().last()) {
        return Err(IdError::InvalidFormat {
            message: format!("{field} '{value}' must start and end with an alphanumeric character"),
        });
    }

    Ok(())
}
