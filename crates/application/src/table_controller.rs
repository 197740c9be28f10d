use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use gridline_core::{ActorContext, AppError, AppResult};
use gridline_domain::{
    ChangeId, ColumnFilter, FilterState, PageState, RecordId, RecordSet, SelectionSet, SortState,
    TableRecord, UndoOffer,
};
use tracing::{debug, info};

use crate::notice::{Notice, NoticeSink};
use crate::record_ports::{DataSourceMode, ListPage, ListParams, RecordGateway};
use crate::view_engine::{self, ViewWindow};

mod bulk;
mod export;
mod mutations;

pub use bulk::BulkOutcome;
pub use export::ExportScope;
pub use mutations::{DeleteOutcome, MAX_HISTORY_LIMIT};

/// List requests one `refresh` may issue while chasing a shrinking page count.
const MAX_REFRESH_ATTEMPTS: usize = 3;

/// Static settings for one table.
#[derive(Debug, Clone)]
pub struct TableControllerConfig {
    /// Label used in notices and logs, e.g. `core box`.
    pub resource_label: String,
    /// Where filtering, sorting and paging run.
    pub mode: DataSourceMode,
    /// Fields that must be present and non-blank before a create or update is sent.
    pub required_fields: Vec<String>,
}

impl Default for TableControllerConfig {
    fn default() -> Self {
        Self {
            resource_label: "record".to_owned(),
            mode: DataSourceMode::ClientSide,
            required_fields: Vec::new(),
        }
    }
}

/// Generation-stamped list request.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTicket {
    generation: u64,
    params: ListParams,
}

impl RefreshTicket {
    /// Returns the request generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the parameters to send to the list endpoint.
    #[must_use]
    pub fn params(&self) -> &ListParams {
        &self.params
    }
}

/// Effect of completing a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Rows were replaced.
    Applied {
        /// Rows now loaded.
        loaded: usize,
        /// Selected ids dropped because their rows disappeared.
        pruned_selection: usize,
    },
    /// A newer refresh was issued; this result was discarded.
    Superseded,
    /// The requested page is past the end; the page was clamped and the rows
    /// were discarded, so the clamped page must be fetched.
    PageClamped {
        /// Last available page.
        page: usize,
    },
}

pub(crate) struct DeletedRecord<R> {
    position: usize,
    record: R,
}

/// Snapshot kept while a delete can still be undone.
pub(crate) struct PendingRestore<R> {
    offer: UndoOffer,
    deleted: DeletedRecord<R>,
}

/// Generic list, filter, sort, page, select and mutate controller for one collection.
pub struct DataTableController<R: TableRecord> {
    gateway: Arc<dyn RecordGateway<R>>,
    notices: Arc<dyn NoticeSink>,
    actor: ActorContext,
    config: TableControllerConfig,
    records: RecordSet<R>,
    server_total: usize,
    filter: FilterState,
    sort: SortState,
    page: PageState,
    selection: SelectionSet,
    generation: u64,
    undo_offer: Option<UndoOffer>,
    deleted: HashMap<ChangeId, PendingRestore<R>>,
    loaded_page: usize,
}

impl<R: TableRecord> DataTableController<R> {
    /// Creates a controller with an empty record set.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn RecordGateway<R>>,
        notices: Arc<dyn NoticeSink>,
        actor: ActorContext,
        config: TableControllerConfig,
        filter: FilterState,
        sort: SortState,
        page: PageState,
    ) -> Self {
        Self {
            gateway,
            notices,
            actor,
            config,
            records: RecordSet::new(),
            server_total: 0,
            filter,
            sort,
            page,
            selection: SelectionSet::new(),
            generation: 0,
            undo_offer: None,
            deleted: HashMap::new(),
            loaded_page: 1,
        }
    }

    /// Returns the gateway, for callers that drive refresh tickets themselves.
    #[must_use]
    pub fn gateway(&self) -> Arc<dyn RecordGateway<R>> {
        Arc::clone(&self.gateway)
    }

    /// Returns the acting user.
    #[must_use]
    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    /// Returns the data source mode.
    #[must_use]
    pub fn mode(&self) -> DataSourceMode {
        self.config.mode
    }

    /// Returns the loaded records.
    #[must_use]
    pub fn records(&self) -> &RecordSet<R> {
        &self.records
    }

    /// Returns the filter state.
    #[must_use]
    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    /// Returns the sort state.
    #[must_use]
    pub fn sort(&self) -> &SortState {
        &self.sort
    }

    /// Returns the page state.
    #[must_use]
    pub fn page_state(&self) -> &PageState {
        &self.page
    }

    /// Returns the selection.
    #[must_use]
    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Returns the pending undo offer.
    #[must_use]
    pub fn undo_offer(&self) -> Option<UndoOffer> {
        self.undo_offer
    }

    /// Sets the free-text query and returns to the first page.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.filter.set_query(query);
        self.page.set_page(1);
    }

    /// Sets a column predicate and returns to the first page.
    pub fn set_column_filter(&mut self, filter: ColumnFilter) {
        self.filter.set_column(filter);
        self.page.set_page(1);
    }

    /// Removes a column predicate and returns to the first page.
    pub fn clear_column_filter(&mut self, field: &str) {
        self.filter.clear_column(field);
        self.page.set_page(1);
    }

    /// Handles a column header click.
    pub fn toggle_sort(&mut self, field: &str) -> AppResult<()> {
        self.sort.toggle(field)
    }

    /// Replaces the sort state.
    pub fn set_sort(&mut self, sort: SortState) {
        self.sort = sort;
    }

    /// Requests a page; the next client-side `view` or server-side refresh clamps it.
    pub fn set_page(&mut self, page: usize) {
        self.page.set_page(page);
    }

    /// Changes the page size.
    pub fn set_page_size(&mut self, page_size: usize) -> AppResult<()> {
        self.page.set_page_size(page_size)
    }

    /// Recomputes the visible window and clamps the current page into range.
    ///
    /// In server-side mode the window describes the page whose rows are loaded;
    /// a page requested since then takes effect on the next refresh.
    pub fn view(&mut self) -> ViewWindow<R> {
        match self.config.mode {
            DataSourceMode::ClientSide => {
                let window = view_engine::apply(
                    self.records.as_slice(),
                    &self.filter,
                    &self.sort,
                    &self.page,
                );
                self.page.set_page(window.page);
                window
            }
            DataSourceMode::ServerSide => {
                let total_pages = self.page.total_pages(self.server_total);
                ViewWindow {
                    rows: self.records.as_slice().to_vec(),
                    total_count: self.server_total,
                    total_pages,
                    page: self.loaded_page.min(total_pages),
                    page_size: self.page.page_size(),
                }
            }
        }
    }

    /// Flips the selection of one loaded row.
    pub fn toggle_selection(&mut self, id: RecordId) -> AppResult<bool> {
        if !self.records.contains(&id) {
            return Err(AppError::NotFound(format!(
                "{} '{id}' is not loaded",
                self.config.resource_label
            )));
        }

        Ok(self.selection.toggle(id))
    }

    /// Selects (or deselects) every row on the current page.
    pub fn select_all_visible(&mut self) {
        let visible_ids = self.view().visible_ids();
        self.selection.select_all_visible(&visible_ids);
    }

    /// Returns whether every row on the current page is selected.
    pub fn is_all_visible_selected(&mut self) -> bool {
        let visible_ids = self.view().visible_ids();
        self.selection.is_all_visible_selected(&visible_ids)
    }

    /// Clears the selection.
    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Starts a new list request; any older ticket becomes stale.
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.generation += 1;
        let params = match self.config.mode {
            DataSourceMode::ClientSide => ListParams::full_collection(),
            DataSourceMode::ServerSide => {
                ListParams::from_state(&self.filter, &self.sort, &self.page)
            }
        };

        RefreshTicket {
            generation: self.generation,
            params,
        }
    }

    /// Applies a list result unless a newer ticket was issued since.
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: AppResult<ListPage<R>>,
    ) -> AppResult<RefreshOutcome> {
        if ticket.generation != self.generation {
            debug!(
                resource = %self.config.resource_label,
                stale_generation = ticket.generation,
                current_generation = self.generation,
                "discarding superseded list result"
            );
            return Ok(RefreshOutcome::Superseded);
        }

        let context = format!("Failed to load {}s", self.config.resource_label);
        let page = match result {
            Ok(page) => page,
            Err(error) => return Err(self.report(context, error)),
        };

        if self.config.mode == DataSourceMode::ServerSide {
            let requested = self.page.page();
            self.page.clamp(page.total);
            if self.page.page() != requested {
                self.server_total = page.total;
                debug!(
                    resource = %self.config.resource_label,
                    requested,
                    clamped = self.page.page(),
                    total = page.total,
                    "requested page is past the end"
                );
                return Ok(RefreshOutcome::PageClamped {
                    page: self.page.page(),
                });
            }
        }

        let total = page.total;
        if let Err(error) = self.records.replace_all(page.rows) {
            return Err(self.report(context, error));
        }

        self.server_total = match self.config.mode {
            DataSourceMode::ClientSide => self.records.len(),
            DataSourceMode::ServerSide => total,
        };
        self.loaded_page = self.page.page();
        let pruned_selection = self.selection.retain_present(&self.records);
        self.prune_expired_restores(Utc::now());

        info!(
            resource = %self.config.resource_label,
            actor = %self.actor.subject(),
            loaded = self.records.len(),
            total = self.server_total,
            pruned_selection,
            "records refreshed"
        );

        Ok(RefreshOutcome::Applied {
            loaded: self.records.len(),
            pruned_selection,
        })
    }

    /// Fetches the collection (or current page) and applies it.
    ///
    /// A server-side page past the end is clamped and fetched again.
    pub async fn refresh(&mut self) -> AppResult<RefreshOutcome> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let ticket = self.begin_refresh();
            let result = self.gateway.list(ticket.params()).await;
            let outcome = self.complete_refresh(ticket, result)?;

            if matches!(outcome, RefreshOutcome::PageClamped { .. })
                && attempts < MAX_REFRESH_ATTEMPTS
            {
                continue;
            }
            return Ok(outcome);
        }
    }

    pub(crate) fn report(&self, context: String, error: AppError) -> AppError {
        self.notices.publish(Notice::error(context.as_str(), &error));
        error
    }

    pub(crate) fn publish(&self, notice: Notice) {
        self.notices.publish(notice);
    }
}

#[cfg(test)]
mod tests;
