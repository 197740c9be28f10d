use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use gridline_core::{ActorContext, AppResult};
use gridline_domain::{UploadFile, UploadItemId};
use serde_json::Value;

/// One file upload handed to the transport.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Queue item being uploaded.
    pub item_id: UploadItemId,
    /// File contents.
    pub file: UploadFile,
    /// Extra multipart fields such as `prefix`, `db_name` or `mode`.
    pub form_fields: BTreeMap<String, String>,
    /// Acting user forwarded with the request.
    pub actor: ActorContext,
}

/// Progress callback handed to the transport for one upload.
#[derive(Clone)]
pub struct UploadProgress {
    report: Arc<dyn Fn(u8) + Send + Sync>,
}

impl UploadProgress {
    /// Creates a progress reporter from a percentage callback.
    pub fn new(report: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    /// Creates a reporter that discards every update.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(|_| {})
    }

    /// Reports a percentage in `[0, 100]`.
    pub fn report_percent(&self, percent: u8) {
        (self.report)(percent.min(100));
    }

    /// Reports bytes sent out of `total`; an unknown total reports zero.
    pub fn report_bytes(&self, sent: u64, total: u64) {
        let percent = if total == 0 {
            0
        } else {
            u8::try_from(sent.min(total).saturating_mul(100) / total).unwrap_or(100)
        };
        self.report_percent(percent);
    }
}

impl Debug for UploadProgress {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("UploadProgress").finish_non_exhaustive()
    }
}

/// Port for sending one file to the backend.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Uploads one file and returns the server's JSON response.
    async fn upload(&self, request: UploadRequest, progress: UploadProgress) -> AppResult<Value>;
}
