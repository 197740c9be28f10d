use gridline_core::{AppError, AppResult};
use gridline_domain::TableRecord;
use tracing::info;

use crate::record_ports::DataSourceMode;
use crate::view_engine::{self, value_text};

use super::DataTableController;

/// Rows included in a CSV export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportScope {
    /// Rows on the current page.
    CurrentPage,
    /// Every row matching the filter, in display order. Server-side tables
    /// only hold the loaded page, so this equals `CurrentPage` there.
    #[default]
    AllMatching,
}

impl<R: TableRecord> DataTableController<R> {
    /// Writes the filtered, sorted rows as CSV with a header of `columns`.
    ///
    /// Missing fields are written as empty cells.
    pub fn export_csv(&mut self, columns: &[&str], scope: ExportScope) -> AppResult<String> {
        if columns.is_empty() {
            return Err(AppError::Validation(
                "export needs at least one column".to_owned(),
            ));
        }

        let rows: Vec<R> = match (scope, self.config.mode) {
            (ExportScope::AllMatching, DataSourceMode::ClientSide) => {
                let mut matching = view_engine::filter_records(self.records.as_slice(), &self.filter);
                view_engine::sort_records(&mut matching, &self.sort);
                matching.into_iter().cloned().collect()
            }
            _ => self.view().rows,
        };

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(columns).map_err(csv_error)?;
        for row in &rows {
            writer
                .write_record(columns.iter().map(|column| {
                    row.field(column).map(value_text).unwrap_or_default()
                }))
                .map_err(csv_error)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|error| AppError::Internal(format!("failed to finish CSV export: {error}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|error| AppError::Internal(format!("CSV export is not UTF-8: {error}")))?;

        info!(
            resource = %self.config.resource_label,
            actor = %self.actor.subject(),
            rows = rows.len(),
            columns = columns.len(),
            "records exported"
        );
        Ok(text)
    }
}

fn csv_error(error: csv::Error) -> AppError {
    AppError::Internal(format!("failed to write CSV row: {error}"))
}
