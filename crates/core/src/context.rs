use serde::{Deserialize, Serialize};

use crate::{AppResult, NonEmptyString};

/// Acting user supplied to controllers and gateways at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    subject: NonEmptyString,
    display_name: Option<String>,
}

impl ActorContext {
    /// Creates an actor context for the given stable subject (usually an email).
    pub fn new(subject: impl Into<String>, display_name: Option<String>) -> AppResult<Self> {
        Ok(Self {
            subject: NonEmptyString::new(subject)?,
            display_name: display_name.and_then(|value| {
                let trimmed = value.trim().to_owned();
                (!trimmed.is_empty()).then_some(trimmed)
            }),
        })
    }

    /// Returns an anonymous actor used when no identity was configured.
    #[must_use]
    pub fn guest() -> Self {
        Self {
            subject: NonEmptyString::from_static("guest"),
            display_name: None,
        }
    }

    /// Returns the stable subject forwarded to the backend.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    /// Returns the display name, falling back to the subject.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.subject.as_str())
    }
}
