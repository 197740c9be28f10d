use chrono::{DateTime, Utc};
use gridline_core::{AppError, AppResult};
use gridline_domain::{ChangeId, ChangeLogEntry, RecordId, RecordPatch, TableRecord, UndoOffer};
use serde_json::Value;
use tracing::{info, warn};

use crate::notice::Notice;
use crate::record_ports::DataSourceMode;
use crate::view_engine::value_text;

use super::{DataTableController, DeletedRecord, PendingRestore};

/// Upper bound accepted by the change history endpoint.
pub const MAX_HISTORY_LIMIT: usize = 500;

/// Result of a confirmed delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Deleted record id.
    pub id: RecordId,
    /// Undo offer, when the server logged the delete.
    pub undo: Option<UndoOffer>,
}

impl<R: TableRecord> DataTableController<R> {
    /// Inserts `draft` immediately, then reconciles it with the server's copy.
    ///
    /// Drafts without a natural key should carry a provisional id.
    pub async fn create(&mut self, draft: R) -> AppResult<RecordId> {
        let label = self.config.resource_label.clone();
        if let Err(error) = self.validate_record(&draft) {
            return Err(self.report(format!("Cannot create {label}"), error));
        }

        let draft_id = draft.record_id();
        if let Err(error) = self.records.prepend(draft.clone()) {
            return Err(self.report(format!("Cannot create {label}"), error));
        }
        self.adjust_server_total(1);

        match self.gateway.create(&draft).await {
            Ok(Some(created)) => {
                let created_id = created.record_id();
                if let Err(error) = self.records.replace(&draft_id, created) {
                    warn!(resource = %label, error = %error, "created record collides with a loaded row");
                    self.records.remove(&draft_id);
                    self.adjust_server_total(-1);
                    self.refresh_after_mutation().await;
                }

                info!(resource = %label, actor = %self.actor.subject(), id = %created_id, "record created");
                self.publish(Notice::info(format!("Created {label} {created_id}")));
                Ok(created_id)
            }
            Ok(None) => {
                info!(resource = %label, actor = %self.actor.subject(), "record created without echo");
                self.publish(Notice::info(format!("Created {label}")));
                self.refresh_after_mutation().await;
                Ok(draft_id)
            }
            Err(error) => {
                self.records.remove(&draft_id);
                self.adjust_server_total(-1);
                Err(self.report(format!("Failed to create {label}"), error))
            }
        }
    }

    /// Applies `patch` immediately and rolls back when the server rejects it.
    pub async fn update(&mut self, id: &RecordId, patch: RecordPatch) -> AppResult<R> {
        let label = self.config.resource_label.clone();
        let result = self.update_record(id, &patch).await;
        match result {
            Ok(record) => {
                self.publish(Notice::info(format!("Saved {label} {id}")));
                Ok(record)
            }
            Err(error) => Err(self.report(format!("Failed to save {label} {id}"), error)),
        }
    }

    /// Removes a row immediately, restoring it at the same position on failure.
    pub async fn delete(&mut self, id: &RecordId) -> AppResult<DeleteOutcome> {
        let label = self.config.resource_label.clone();
        match self.delete_record(id).await {
            Ok(outcome) => {
                let mut notice = Notice::info(format!("Removed {label} {id}"));
                if let Some(offer) = outcome.undo {
                    notice = notice.with_undo(offer);
                }
                self.publish(notice);
                Ok(outcome)
            }
            Err(error) => Err(self.report(format!("Failed to delete {label} {id}"), error)),
        }
    }

    /// Restores a deleted record from its change-log entry.
    pub async fn restore(&mut self, change_id: ChangeId) -> AppResult<RecordId> {
        let label = self.config.resource_label.clone();
        let restored_id = match self.gateway.restore(change_id).await {
            Ok(restored_id) => restored_id,
            Err(error) => {
                return Err(self.report(format!("Failed to restore {label}"), error));
            }
        };

        if self
            .undo_offer
            .is_some_and(|offer| offer.change_id() == change_id)
        {
            self.undo_offer = None;
        }

        match self.deleted.remove(&change_id) {
            Some(PendingRestore {
                deleted: DeletedRecord {
                    position,
                    mut record,
                },
                ..
            }) if !self.records.contains(&restored_id) => {
                record.set_record_id(restored_id.clone());
                if self.records.insert_at(position, record).is_ok() {
                    self.adjust_server_total(1);
                }
            }
            _ => self.refresh_after_mutation().await,
        }

        info!(
            resource = %label,
            actor = %self.actor.subject(),
            change_id = %change_id,
            id = %restored_id,
            "record restored"
        );
        self.publish(Notice::info(format!("Restored {label} {restored_id}")));
        Ok(restored_id)
    }

    /// Takes the pending undo offer if it is still active at `now`.
    pub async fn undo(&mut self, now: DateTime<Utc>) -> AppResult<Option<RecordId>> {
        let Some(offer) = self.undo_offer.take() else {
            return Ok(None);
        };

        if !offer.is_active(now) {
            self.deleted.remove(&offer.change_id());
            return Err(self.report(
                "Cannot undo".to_owned(),
                AppError::Validation("the undo window has expired".to_owned()),
            ));
        }

        self.restore(offer.change_id()).await.map(Some)
    }

    /// Returns the most recent change-log entries, newest first.
    pub async fn history(&self, limit: usize) -> AppResult<Vec<ChangeLogEntry>> {
        self.gateway
            .list_changes(limit.clamp(1, MAX_HISTORY_LIMIT))
            .await
            .map_err(|error| {
                self.report(
                    format!("Failed to load {} history", self.config.resource_label),
                    error,
                )
            })
    }

    pub(super) async fn update_record(&mut self, id: &RecordId, patch: &RecordPatch) -> AppResult<R> {
        self.validate_patch(patch)?;

        let previous = self.records.get(id).cloned().ok_or_else(|| {
            AppError::NotFound(format!("{} '{id}' is not loaded", self.config.resource_label))
        })?;
        if id.is_provisional() {
            return Err(AppError::Conflict(format!(
                "{} '{id}' has not been saved yet",
                self.config.resource_label
            )));
        }

        let mut patched = previous.clone();
        patched.apply_patch(patch);
        let patched_id = patched.record_id();
        self.records.replace(id, patched)?;

        let expected_version = previous.version();
        match self
            .gateway
            .update(id, patch, expected_version.as_deref())
            .await
        {
            Ok(updated) => {
                let updated_id = updated.record_id();
                if let Err(error) = self.records.replace(&patched_id, updated.clone()) {
                    warn!(error = %error, "updated record collides with a loaded row");
                    self.refresh_after_mutation().await;
                }
                if &updated_id != id && self.selection.remove(id) {
                    self.selection.toggle(updated_id);
                }
                info!(
                    resource = %self.config.resource_label,
                    actor = %self.actor.subject(),
                    id = %id,
                    "record updated"
                );
                Ok(updated)
            }
            Err(error) => {
                let _ = self.records.replace(&patched_id, previous);
                Err(error)
            }
        }
    }

    pub(super) async fn delete_record(&mut self, id: &RecordId) -> AppResult<DeleteOutcome> {
        if id.is_provisional() {
            return Err(AppError::Conflict(format!(
                "{} '{id}' has not been saved yet",
                self.config.resource_label
            )));
        }

        self.prune_expired_restores(Utc::now());
        let (position, record) = self.records.remove(id).ok_or_else(|| {
            AppError::NotFound(format!("{} '{id}' is not loaded", self.config.resource_label))
        })?;
        let was_selected = self.selection.remove(id);
        self.adjust_server_total(-1);

        match self.gateway.delete(id, record.version().as_deref()).await {
            Ok(receipt) => {
                let undo = receipt.change_id.map(|change_id| {
                    let offer = UndoOffer::new(change_id, Utc::now());
                    self.deleted.insert(
                        change_id,
                        PendingRestore {
                            offer,
                            deleted: DeletedRecord { position, record },
                        },
                    );
                    offer
                });
                if undo.is_some() {
                    self.undo_offer = undo;
                }

                info!(
                    resource = %self.config.resource_label,
                    actor = %self.actor.subject(),
                    id = %id,
                    change_id = ?receipt.change_id,
                    "record deleted"
                );
                Ok(DeleteOutcome {
                    id: id.clone(),
                    undo,
                })
            }
            Err(error) => {
                if self.records.insert_at(position, record).is_ok() {
                    self.adjust_server_total(1);
                    if was_selected {
                        self.selection.toggle(id.clone());
                    }
                }
                Err(error)
            }
        }
    }

    fn validate_record(&self, record: &R) -> AppResult<()> {
        let missing: Vec<&str> = self
            .config
            .required_fields
            .iter()
            .filter(|field| is_blank(record.field(field)))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "required fields are missing: {}",
                missing.join(", ")
            )))
        }
    }

    fn validate_patch(&self, patch: &RecordPatch) -> AppResult<()> {
        if patch.is_empty() {
            return Err(AppError::Validation("nothing to save".to_owned()));
        }

        let blanked: Vec<&str> = self
            .config
            .required_fields
            .iter()
            .filter(|field| patch.contains_key(field.as_str()) && is_blank(patch.get(field.as_str())))
            .map(String::as_str)
            .collect();

        if blanked.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "required fields cannot be cleared: {}",
                blanked.join(", ")
            )))
        }
    }

    /// Drops delete snapshots whose undo window has passed; a later restore
    /// of those changes reloads the rows instead.
    pub(super) fn prune_expired_restores(&mut self, now: DateTime<Utc>) {
        self.deleted.retain(|_, pending| pending.offer.is_active(now));
    }

    pub(super) fn adjust_server_total(&mut self, delta: isize) {
        if self.config.mode == DataSourceMode::ServerSide {
            self.server_total = self.server_total.saturating_add_signed(delta);
        }
    }

    async fn refresh_after_mutation(&mut self) {
        if let Err(error) = self.refresh().await {
            warn!(
                resource = %self.config.resource_label,
                error = %error,
                "refresh after mutation failed"
            );
        }
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    value
        .map(|value| value_text(value).trim().is_empty())
        .unwrap_or(true)
}
