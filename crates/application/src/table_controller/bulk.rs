use gridline_core::{AppError, AppResult};
use gridline_domain::{RecordId, RecordPatch, TableRecord};
use tracing::{info, warn};

use crate::notice::Notice;

use super::{DataTableController, DeletedRecord};

/// Per-id results of a sequential bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkOutcome {
    /// Ids the server accepted, in processing order.
    pub succeeded: Vec<RecordId>,
    /// Ids the server rejected, with the reason.
    pub failed: Vec<(RecordId, AppError)>,
}

impl BulkOutcome {
    /// Returns how many ids were attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

impl<R: TableRecord> DataTableController<R> {
    /// Deletes every selected row one request at a time.
    ///
    /// A failure keeps earlier deletes; the last logged delete becomes the undo offer.
    pub async fn bulk_delete(&mut self) -> AppResult<BulkOutcome> {
        let ids = self.selected_ids_in_order();
        let mut outcome = BulkOutcome::default();

        for id in ids {
            match self.delete_record(&id).await {
                Ok(_) => outcome.succeeded.push(id),
                Err(error) => {
                    warn!(id = %id, error = %error, "bulk delete item failed");
                    outcome.failed.push((id, error));
                }
            }
        }

        self.publish_bulk_summary("Deleted", &outcome);
        Ok(outcome)
    }

    /// Applies the same patch to every selected row one request at a time.
    pub async fn bulk_update(&mut self, patch: RecordPatch) -> AppResult<BulkOutcome> {
        let ids = self.selected_ids_in_order();
        let mut outcome = BulkOutcome::default();

        for id in ids {
            match self.update_record(&id, &patch).await {
                Ok(updated) => outcome.succeeded.push(updated.record_id()),
                Err(error) => {
                    warn!(id = %id, error = %error, "bulk update item failed");
                    outcome.failed.push((id, error));
                }
            }
        }

        self.publish_bulk_summary("Updated", &outcome);
        Ok(outcome)
    }

    /// Deletes every selected row with one bulk request; all rows come back on failure.
    pub async fn bulk_delete_all_or_nothing(&mut self) -> AppResult<usize> {
        let ids = self.selected_ids_in_order();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut removed: Vec<DeletedRecord<R>> = ids
            .iter()
            .filter_map(|id| self.records.remove(id))
            .map(|(position, record)| DeletedRecord { position, record })
            .collect();

        match self.gateway.bulk_delete(&ids).await {
            Ok(receipt) => {
                for id in &ids {
                    self.selection.remove(id);
                }
                self.refresh_server_total_after_bulk(removed.len());
                info!(
                    resource = %self.config.resource_label,
                    actor = %self.actor.subject(),
                    requested = ids.len(),
                    deleted = receipt.deleted,
                    "bulk delete finished"
                );
                self.publish(Notice::info(format!(
                    "Deleted {} {}(s)",
                    ids.len(),
                    self.config.resource_label
                )));
                Ok(ids.len())
            }
            Err(error) => {
                while let Some(DeletedRecord { position, record }) = removed.pop() {
                    let _ = self.records.insert_at(position, record);
                }
                let context = format!("Failed to delete selected {}s", self.config.resource_label);
                Err(self.report(context, error))
            }
        }
    }

    fn selected_ids_in_order(&self) -> Vec<RecordId> {
        self.records
            .iter()
            .map(TableRecord::record_id)
            .filter(|id| self.selection.contains(id))
            .collect()
    }

    fn refresh_server_total_after_bulk(&mut self, removed: usize) {
        let delta = isize::try_from(removed).unwrap_or(isize::MAX);
        self.adjust_server_total(-delta);
    }

    fn publish_bulk_summary(&self, verb: &str, outcome: &BulkOutcome) {
        if outcome.attempted() == 0 {
            return;
        }

        let label = self.config.resource_label.as_str();
        if outcome.failed.is_empty() {
            let mut notice = Notice::info(format!(
                "{verb} {} {label}(s)",
                outcome.succeeded.len()
            ));
            if verb == "Deleted"
                && let Some(offer) = self.undo_offer
            {
                notice = notice.with_undo(offer);
            }
            self.publish(notice);
        } else {
            let summary = AppError::Validation(format!(
                "{} of {} {label}(s) failed",
                outcome.failed.len(),
                outcome.attempted()
            ));
            self.publish(Notice::error(
                format!("{verb} {} {label}(s)", outcome.succeeded.len()).as_str(),
                &summary,
            ));
        }
    }
}
