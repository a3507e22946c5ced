// SPDX-License-Identifier: MIT

//! Shared error types. Each downstream crate adds its own leaf error enum
//! and wraps these where validation crosses a boundary.

use thiserror::Error;

/// Failure to construct or decode a canonical event (§4.1).
///
/// Every variant here is a dead-letter reason in §7: `UnknownEventType` and
/// `MissingField` map to `schema_violation`, `PayloadTooLarge` maps to
/// `payload_too_large`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unknown event_type: {0}")]
    UnknownEventType(String),
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("payload exceeds {limit} bytes after serialization ({actual} bytes)")]
    PayloadTooLarge { limit: usize, actual: usize },
    #[error("malformed JSON in field {field}: {source}")]
    MalformedJson {
        field: &'static str,
        #[source]
        source: std::sync::Arc<serde_json::Error>,
    },
}

impl ValidationError {
    /// The dead-letter `reason` this validation failure is reported under (§7).
    pub fn dead_letter_reason(&self) -> &'static str {
        match self {
            ValidationError::PayloadTooLarge { .. } => "payload_too_large",
            _ => "schema_violation",
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
