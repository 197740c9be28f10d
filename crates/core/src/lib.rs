//! Shared primitives for all Rust crates in Gridline.

#![forbid(unsafe_code)]

/// Acting-user context passed explicitly into controllers.
pub mod context;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use context::ActorContext;

/// Result type used across Gridline crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    pub(crate) fn from_static(value: &'static str) -> Self {
        Self(value.to_owned())
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Common application error categories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Invalid input or violated invariant, including client-side form validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state (duplicate key, stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// User is not authenticated.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// User is authenticated but not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The backend could not be reached or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an unexpected non-success status.
    #[error("upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Human-readable message extracted from the response.
        message: String,
    },

    /// The operation was canceled before it completed.
    #[error("canceled: {0}")]
    Cancelled(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns a message suitable for showing to an end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message)
            | Self::NotFound(message)
            | Self::Conflict(message)
            | Self::Unauthorized(message)
            | Self::Forbidden(message)
            | Self::Transport(message)
            | Self::Cancelled(message)
            | Self::Internal(message) => message.clone(),
            Self::Upstream { status, message } => format!("{message} (HTTP {status})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, NonEmptyString};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn upstream_user_message_includes_status() {
        let error = AppError::Upstream {
            status: 502,
            message: "bad gateway".to_owned(),
        };
        assert_eq!(error.user_message(), "bad gateway (HTTP 502)");
        assert_eq!(error.to_string(), "upstream error (502): bad gateway");
    }
}
