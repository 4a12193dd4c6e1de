//! CRM error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the CRM.
#[derive(Debug, Error)]
pub enum CrmError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credentials were rejected or the session could not be established.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The CRM returned a non-success status code.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The CRM returned a 429 Too Many Requests response.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Failed to parse a CRM response.
    #[error("parse error: {0}")]
    Parse(String),

    /// The cursor does not belong to this client.
    #[error("unsupported page cursor: {0}")]
    InvalidCursor(String),
}

impl CrmError {
    /// Whether the same request may succeed if retried.
    ///
    /// Rate limiting, 5xx responses, API request-limit errors, and transport
    /// failures are transient. Authentication, 4xx and parse errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, message } => {
                *status >= 500 || message.contains("REQUEST_LIMIT_EXCEEDED")
            }
            Self::Http(e) => !(e.is_decode() || e.is_builder() || e.is_status()),
            Self::Authentication(_) | Self::Parse(_) | Self::InvalidCursor(_) => false,
        }
    }

    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Server-requested wait before the next attempt, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}
