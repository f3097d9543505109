//! Error classification shared by every pipeline subsystem.
//!
//! Each subsystem keeps its own `thiserror` enum; `kind()` on those enums maps a concrete
//! failure onto one of the categories below so that the HTTP layer and the tests can reason
//! about failures without matching on every variant.

use serde::Serialize;

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or transport failure, including timeouts.
    ServiceUnavailable,
    /// A remote call completed with a non-success status or an unusable body.
    ServiceRejected,
    /// Invalid chunking parameters or missing endpoint configuration.
    Configuration,
    /// A document, user, or department reference did not resolve.
    NotFound,
    /// Required input fields were missing or malformed.
    Validation,
}

/// Classify a `reqwest` transport error.
pub(crate) fn classify_http(error: &reqwest::Error) -> ErrorKind {
    if error.is_builder() {
        ErrorKind::Configuration
    } else if error.is_decode() {
        ErrorKind::ServiceRejected
    } else {
        ErrorKind::ServiceUnavailable
    }
}
