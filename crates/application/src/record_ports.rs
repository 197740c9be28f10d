use async_trait::async_trait;
use gridline_core::AppResult;
use gridline_domain::{
    ChangeId, ChangeLogEntry, ColumnFilter, FilterState, PageState, RecordId, RecordPatch,
    SortKey, SortState, TableRecord,
};

/// Collections expected to stay below this many rows are filtered in memory.
pub const DEFAULT_CLIENT_SIDE_ROW_LIMIT: usize = 2_000;

/// Where filtering, sorting and paging happen for one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceMode {
    /// Fetch the full collection once and derive every page locally.
    ClientSide,
    /// Forward filter, sort and page parameters; the server returns one page.
    ServerSide,
}

impl DataSourceMode {
    /// Picks server-side processing for collections above `client_side_row_limit`.
    #[must_use]
    pub fn for_expected_rows(expected_rows: usize, client_side_row_limit: usize) -> Self {
        if expected_rows > client_side_row_limit {
            Self::ServerSide
        } else {
            Self::ClientSide
        }
    }

    /// Returns the stable configuration value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientSide => "client",
            Self::ServerSide => "server",
        }
    }
}

/// Parameters forwarded to the list endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListParams {
    /// Free-text query.
    pub query: Option<String>,
    /// Column predicates.
    pub filters: Vec<ColumnFilter>,
    /// Sort keys in priority order.
    pub sort: Vec<SortKey>,
    /// Requested 1-based page.
    pub page: Option<usize>,
    /// Requested page size.
    pub page_size: Option<usize>,
}

impl ListParams {
    /// Parameters that fetch the whole collection.
    #[must_use]
    pub fn full_collection() -> Self {
        Self::default()
    }

    /// Parameters that delegate the current table state to the server.
    #[must_use]
    pub fn from_state(filter: &FilterState, sort: &SortState, page: &PageState) -> Self {
        let query = filter.query();
        Self {
            query: (!query.is_empty()).then(|| query.to_owned()),
            filters: filter.columns().to_vec(),
            sort: sort.keys().to_vec(),
            page: Some(page.page()),
            page_size: Some(page.page_size()),
        }
    }
}

/// One page (or the whole collection) returned by the list endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<R> {
    /// Returned rows.
    pub rows: Vec<R>,
    /// Total matching rows on the server.
    pub total: usize,
}

/// Result of a single delete.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeleteReceipt {
    /// Change-log id usable for restore, when the collection keeps one.
    pub change_id: Option<ChangeId>,
    /// Server message.
    pub message: Option<String>,
}

/// Result of a bulk delete request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkDeleteReceipt {
    /// Number of rows the server reports as deleted.
    pub deleted: usize,
    /// Server message.
    pub message: Option<String>,
}

/// Port for the REST collection backing one table.
#[async_trait]
pub trait RecordGateway<R: TableRecord>: Send + Sync {
    /// Lists records.
    async fn list(&self, params: &ListParams) -> AppResult<ListPage<R>>;

    /// Creates a record; `None` when the server replied with a message only.
    async fn create(&self, record: &R) -> AppResult<Option<R>>;

    /// Updates a record, rejecting the write when `expected_version` is stale.
    async fn update(
        &self,
        id: &RecordId,
        patch: &RecordPatch,
        expected_version: Option<&str>,
    ) -> AppResult<R>;

    /// Deletes a record, rejecting the write when `expected_version` is stale.
    async fn delete(&self, id: &RecordId, expected_version: Option<&str>)
    -> AppResult<DeleteReceipt>;

    /// Deletes several records in one request.
    async fn bulk_delete(&self, ids: &[RecordId]) -> AppResult<BulkDeleteReceipt>;

    /// Restores a deleted record from its change-log entry and returns its id.
    async fn restore(&self, change_id: ChangeId) -> AppResult<RecordId>;

    /// Lists the most recent change-log entries.
    async fn list_changes(&self, limit: usize) -> AppResult<Vec<ChangeLogEntry>>;
}
