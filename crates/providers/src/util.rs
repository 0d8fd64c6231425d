use pk_domain::{Error, ErrorClass};

use crate::credentials::mask;

/// Convert a transport error, classifying timeouts as retryable.
pub(crate) fn from_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(mask(&err.to_string()))
    } else {
        Error::Http(mask(&err.to_string()))
    }
}

/// Classify an HTTP status into a provider error class.
pub(crate) fn classify_status(status: reqwest::StatusCode) -> ErrorClass {
    if status.as_u16() == 429 {
        ErrorClass::RateLimit
    } else if status.as_u16() == 408 {
        ErrorClass::Timeout
    } else if status.is_server_error() {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Build a classified provider error from a non-success HTTP response body.
pub(crate) fn provider_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    Error::Provider {
        provider: provider.to_string(),
        class: classify_status(status),
        message: format!("HTTP {}: {}", status.as_u16(), mask(body)),
    }
}
