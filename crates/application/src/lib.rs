//! Table and upload controllers plus the ports they drive.

#![forbid(unsafe_code)]

mod notice;
mod record_ports;
mod table_controller;
mod upload_ports;
mod upload_queue;
pub mod view_engine;

pub use notice::{Notice, NoticeLevel, NoticeSink};
pub use record_ports::{
    BulkDeleteReceipt, DEFAULT_CLIENT_SIDE_ROW_LIMIT, DataSourceMode, DeleteReceipt, ListPage,
    ListParams, RecordGateway,
};
pub use table_controller::{
    BulkOutcome, DataTableController, DeleteOutcome, ExportScope, MAX_HISTORY_LIMIT,
    RefreshOutcome, RefreshTicket, TableControllerConfig,
};
pub use upload_ports::{UploadProgress, UploadRequest, UploadTransport};
pub use upload_queue::{
    DEFAULT_UPLOAD_CONCURRENCY, EnqueueOutcome, UploadQueue, UploadQueueConfig, UploadRunSummary,
};
pub use view_engine::ViewWindow;
