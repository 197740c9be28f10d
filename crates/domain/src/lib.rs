//! Domain entities and invariants for tabular record management.

#![forbid(unsafe_code)]

mod change_log;
mod query;
mod record;
mod record_set;
mod selection;
mod upload;

pub use change_log::{ChangeAction, ChangeId, ChangeLogEntry, UNDO_WINDOW_SECONDS, UndoOffer};
pub use query::{
    ColumnFilter, DEFAULT_PAGE_SIZES, FilterPredicate, FilterState, PageState, SortDirection,
    SortKey, SortState,
};
pub use record::{Record, RecordId, RecordPatch, TableRecord, VERSION_FIELD};
pub use record_set::RecordSet;
pub use selection::SelectionSet;
pub use upload::{UploadFile, UploadItem, UploadItemId, UploadStatus};
