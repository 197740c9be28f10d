use gridline_application::{Notice, NoticeLevel, NoticeSink};
use tracing::{info, warn};

/// Notice sink that writes every notice to the tracing subscriber.
#[derive(Debug, Clone, Default)]
pub struct TracingNoticeSink {
    surface: String,
}

impl TracingNoticeSink {
    /// Creates a sink tagging notices with the surface that raised them, e.g. `core-boxes`.
    #[must_use]
    pub fn new(surface: impl Into<String>) -> Self {
        Self {
            surface: surface.into(),
        }
    }
}

impl NoticeSink for TracingNoticeSink {
    fn publish(&self, notice: Notice) {
        let undo_change_id = notice.undo.map(|offer| offer.change_id().as_i64());

        match notice.level {
            NoticeLevel::Info => info!(
                surface = %self.surface,
                undo_change_id,
                "{}",
                notice.message
            ),
            NoticeLevel::Error => warn!(surface = %self.surface, "{}", notice.message),
        }
    }
}
