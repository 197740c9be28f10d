use std::fmt::{Display, Formatter};
use std::sync::Arc;

use gridline_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Queue-assigned upload identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadItemId(u64);

impl UploadItemId {
    /// Wraps a raw item id.
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw id.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for UploadItemId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// File contents waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    file_name: NonEmptyString,
    content_type: Option<String>,
    data: Arc<[u8]>,
}

impl UploadFile {
    /// Creates an upload file from its name and contents.
    pub fn new(
        file_name: impl Into<String>,
        content_type: Option<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> AppResult<Self> {
        Ok(Self {
            file_name: NonEmptyString::new(file_name)?,
            content_type,
            data: data.into(),
        })
    }

    /// Returns the file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.file_name.as_str()
    }

    /// Returns the MIME type, when known.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Returns the file contents.
    #[must_use]
    pub fn data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Returns the size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the lowercase extension without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.as_str();
        let (stem, extension) = name.rsplit_once('.')?;
        (!stem.is_empty() && !extension.is_empty()).then(|| extension.to_ascii_lowercase())
    }
}

/// Upload lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Waiting for a free slot.
    Queued,
    /// Request in flight.
    Uploading,
    /// Server accepted the file.
    Done,
    /// Request failed.
    Error,
    /// Aborted by the user.
    Canceled,
}

impl UploadStatus {
    /// Returns the stable display value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Error => "error",
            Self::Canceled => "canceled",
        }
    }

    /// Returns whether no further automatic transition happens.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }
}

/// One entry of the upload queue.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadItem {
    id: UploadItemId,
    file: UploadFile,
    progress: u8,
    status: UploadStatus,
    receipt: Option<Value>,
    error: Option<String>,
}

impl UploadItem {
    /// Creates a queued item.
    #[must_use]
    pub fn queued(id: UploadItemId, file: UploadFile) -> Self {
        Self {
            id,
            file,
            progress: 0,
            status: UploadStatus::Queued,
            receipt: None,
            error: None,
        }
    }

    /// Returns the item id.
    #[must_use]
    pub fn id(&self) -> UploadItemId {
        self.id
    }

    /// Returns the file.
    #[must_use]
    pub fn file(&self) -> &UploadFile {
        &self.file
    }

    /// Returns progress in percent.
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Returns the status.
    #[must_use]
    pub fn status(&self) -> UploadStatus {
        self.status
    }

    /// Returns the server response for a finished upload.
    #[must_use]
    pub fn receipt(&self) -> Option<&Value> {
        self.receipt.as_ref()
    }

    /// Returns the failure message for an errored upload.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// `queued -> uploading`.
    pub fn start(&mut self) -> AppResult<()> {
        self.transition(UploadStatus::Queued, UploadStatus::Uploading)?;
        self.progress = 0;
        Ok(())
    }

    /// Records progress; ignored unless uploading. Progress never moves backwards.
    pub fn report_progress(&mut self, percent: u8) {
        if self.status == UploadStatus::Uploading {
            self.progress = self.progress.max(percent.min(100));
        }
    }

    /// `uploading -> done`.
    pub fn complete(&mut self, receipt: Value) -> AppResult<()> {
        self.transition(UploadStatus::Uploading, UploadStatus::Done)?;
        self.progress = 100;
        self.receipt = Some(receipt);
        Ok(())
    }

    /// `uploading -> error`.
    pub fn fail(&mut self, message: impl Into<String>) -> AppResult<()> {
        self.transition(UploadStatus::Uploading, UploadStatus::Error)?;
        self.error = Some(message.into());
        Ok(())
    }

    /// `queued | uploading -> canceled`.
    pub fn cancel(&mut self) -> AppResult<()> {
        match self.status {
            UploadStatus::Queued | UploadStatus::Uploading => {
                self.status = UploadStatus::Canceled;
                Ok(())
            }
            status => Err(invalid_transition(status, UploadStatus::Canceled)),
        }
    }

    /// `error | canceled -> queued`, for a later manual retry.
    pub fn reset(&mut self) -> AppResult<()> {
        match self.status {
            UploadStatus::Error | UploadStatus::Canceled => {
                self.status = UploadStatus::Queued;
                self.progress = 0;
                self.error = None;
                Ok(())
            }
            status => Err(invalid_transition(status, UploadStatus::Queued)),
        }
    }

    fn transition(&mut self, expected: UploadStatus, next: UploadStatus) -> AppResult<()> {
        if self.status != expected {
            return Err(invalid_transition(self.status, next));
        }

        self.status = next;
        Ok(())
    }
}

fn invalid_transition(from: UploadStatus, to: UploadStatus) -> AppError {
    AppError::Conflict(format!(
        "upload cannot move from '{}' to '{}'",
        from.as_str(),
        to.as_str()
    ))
}
