use gridline_core::AppError;
use gridline_domain::UndoOffer;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Confirmation of a completed action.
    Info,
    /// A failed action the user may retry.
    Error,
}

/// User-facing message published by a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity.
    pub level: NoticeLevel,
    /// Human-readable text.
    pub message: String,
    /// Undo action attached to a delete confirmation.
    pub undo: Option<UndoOffer>,
}

impl Notice {
    /// Creates an informational notice.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            undo: None,
        }
    }

    /// Creates an error notice from context and the failure.
    #[must_use]
    pub fn error(context: &str, error: &AppError) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: format!("{context}: {}", error.user_message()),
            undo: None,
        }
    }

    /// Attaches an undo offer.
    #[must_use]
    pub fn with_undo(mut self, offer: UndoOffer) -> Self {
        self.undo = Some(offer);
        self
    }
}

/// Single error and confirmation reporting port; the UI decides how to render notices.
pub trait NoticeSink: Send + Sync {
    /// Publishes one notice.
    fn publish(&self, notice: Notice);
}
