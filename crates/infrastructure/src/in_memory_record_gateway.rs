use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use gridline_application::view_engine::{filter_records, sort_records};
use gridline_application::{
    BulkDeleteReceipt, DeleteReceipt, ListPage, ListParams, RecordGateway,
};
use gridline_core::{ActorContext, AppError, AppResult, NonEmptyString};
use gridline_domain::{
    ChangeAction, ChangeId, ChangeLogEntry, FilterState, PageState, RecordId, RecordPatch,
    SortState, TableRecord, VERSION_FIELD,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

struct InMemoryState<R> {
    records: Vec<R>,
    changes: Vec<ChangeLogEntry>,
    restored: HashSet<ChangeId>,
    next_record_id: i64,
    next_change_id: i64,
}

/// In-memory collection backend with a change log and row versions.
///
/// Useful for demos and tests; list requests are answered with the same
/// filter and sort rules the client-side engine applies.
pub struct InMemoryRecordGateway<R> {
    key_field: NonEmptyString,
    search_fields: Vec<String>,
    actor: ActorContext,
    state: RwLock<InMemoryState<R>>,
}

impl<R: TableRecord> InMemoryRecordGateway<R> {
    /// Creates an empty collection.
    pub fn new(key_field: &str, search_fields: Vec<String>, actor: ActorContext) -> AppResult<Self> {
        Ok(Self {
            key_field: NonEmptyString::new(key_field)?,
            search_fields,
            actor,
            state: RwLock::new(InMemoryState {
                records: Vec::new(),
                changes: Vec::new(),
                restored: HashSet::new(),
                next_record_id: 1,
                next_change_id: 1,
            }),
        })
    }

    /// Loads rows without logging changes; numeric ids advance the id sequence.
    pub async fn seed(&self, records: Vec<R>) -> AppResult<()> {
        let mut state = self.state.write().await;
        for mut record in records {
            let id = record.record_id();
            if state.records.iter().any(|existing| existing.record_id() == id) {
                return Err(AppError::Conflict(format!("record '{id}' already exists")));
            }
            if let RecordId::Number(number) = id {
                state.next_record_id = state.next_record_id.max(number.saturating_add(1));
            }
            if record.version().is_none() {
                record.set_field(VERSION_FIELD, Value::from(1));
            }
            state.records.push(record);
        }

        Ok(())
    }

    fn log_change(
        &self,
        state: &mut InMemoryState<R>,
        action: ChangeAction,
        record_id: &RecordId,
        snapshot: Option<Value>,
    ) -> ChangeId {
        let id = ChangeId::new(state.next_change_id);
        state.next_change_id += 1;
        state.changes.push(ChangeLogEntry {
            id,
            action,
            record_id: Some(record_id.clone()),
            snapshot,
            actor: Some(self.actor.subject().to_owned()),
            timestamp: Utc::now(),
        });
        id
    }

    fn filter_state(&self, params: &ListParams) -> FilterState {
        let mut filter = FilterState::searching(self.search_fields.iter().cloned());
        if let Some(query) = params.query.as_deref() {
            filter.set_query(query);
        }
        for column in &params.filters {
            filter.set_column(column.clone());
        }
        filter
    }

    fn sort_state(params: &ListParams) -> AppResult<SortState> {
        params.sort.iter().try_fold(SortState::unsorted(), |sort, key| {
            sort.then_by(key.field(), key.direction())
        })
    }
}

fn check_version<R: TableRecord>(
    record: &R,
    expected_version: Option<&str>,
) -> AppResult<()> {
    match (expected_version, record.version()) {
        (Some(expected), Some(current)) if expected != current => Err(AppError::Conflict(
            format!(
                "record '{}' was modified by another user",
                record.record_id()
            ),
        )),
        _ => Ok(()),
    }
}

fn bump_version<R: TableRecord>(record: &mut R) {
    let next = record
        .version()
        .and_then(|version| version.parse::<i64>().ok())
        .unwrap_or(0)
        .saturating_add(1);
    record.set_field(VERSION_FIELD, Value::from(next));
}

fn position_of<R: TableRecord>(records: &[R], id: &RecordId) -> AppResult<usize> {
    records
        .iter()
        .position(|record| &record.record_id() == id)
        .ok_or_else(|| AppError::NotFound(format!("record '{id}' does not exist")))
}

#[async_trait]
impl<R: TableRecord> RecordGateway<R> for InMemoryRecordGateway<R> {
    async fn list(&self, params: &ListParams) -> AppResult<ListPage<R>> {
        let filter = self.filter_state(params);
        let sort = Self::sort_state(params)?;

        let state = self.state.read().await;
        let mut rows = filter_records(&state.records, &filter);
        sort_records(&mut rows, &sort);
        let total = rows.len();

        let rows = match (params.page, params.page_size) {
            (page, Some(page_size)) => {
                let mut paging = PageState::with_allowed_sizes(page_size, vec![page_size])?;
                paging.set_page(page.unwrap_or(1));
                rows.into_iter()
                    .skip(paging.offset())
                    .take(page_size)
                    .cloned()
                    .collect()
            }
            (_, None) => rows.into_iter().cloned().collect(),
        };

        Ok(ListPage { rows, total })
    }

    async fn create(&self, record: &R) -> AppResult<Option<R>> {
        let mut state = self.state.write().await;
        let mut created = record.clone();

        if created.record_id().is_provisional() {
            let id = RecordId::Number(state.next_record_id);
            state.next_record_id += 1;
            created.set_record_id(id);
        }
        let id = created.record_id();
        if state.records.iter().any(|existing| existing.record_id() == id) {
            return Err(AppError::Conflict(format!(
                "record with {} '{id}' already exists",
                self.key_field.as_str()
            )));
        }

        created.set_field(VERSION_FIELD, Value::from(1));
        self.log_change(&mut state, ChangeAction::Create, &id, None);
        state.records.insert(0, created.clone());

        debug!(id = %id, "in-memory record created");
        Ok(Some(created))
    }

    async fn update(
        &self,
        id: &RecordId,
        patch: &RecordPatch,
        expected_version: Option<&str>,
    ) -> AppResult<R> {
        let mut state = self.state.write().await;
        let position = position_of(&state.records, id)?;
        check_version(&state.records[position], expected_version)?;

        let mut updated = state.records[position].clone();
        updated.apply_patch(patch);
        let updated_id = updated.record_id();
        if &updated_id != id && state.records.iter().any(|record| record.record_id() == updated_id) {
            return Err(AppError::Conflict(format!(
                "record with {} '{updated_id}' already exists",
                self.key_field.as_str()
            )));
        }
        bump_version(&mut updated);

        let snapshot = state.records[position].to_json();
        self.log_change(&mut state, ChangeAction::Update, id, Some(snapshot));
        state.records[position] = updated.clone();

        Ok(updated)
    }

    async fn delete(
        &self,
        id: &RecordId,
        expected_version: Option<&str>,
    ) -> AppResult<DeleteReceipt> {
        let mut state = self.state.write().await;
        let position = position_of(&state.records, id)?;
        check_version(&state.records[position], expected_version)?;

        let removed = state.records.remove(position);
        let change_id = self.log_change(&mut state, ChangeAction::Delete, id, Some(removed.to_json()));

        Ok(DeleteReceipt {
            change_id: Some(change_id),
            message: Some(format!("deleted {id}")),
        })
    }

    async fn bulk_delete(&self, ids: &[RecordId]) -> AppResult<BulkDeleteReceipt> {
        let mut state = self.state.write().await;
        let mut deleted = 0;
        for id in ids {
            let Ok(position) = position_of(&state.records, id) else {
                continue;
            };
            let removed = state.records.remove(position);
            self.log_change(&mut state, ChangeAction::Delete, id, Some(removed.to_json()));
            deleted += 1;
        }

        Ok(BulkDeleteReceipt {
            deleted,
            message: Some(format!("deleted {deleted} of {}", ids.len())),
        })
    }

    async fn restore(&self, change_id: ChangeId) -> AppResult<RecordId> {
        let mut state = self.state.write().await;
        let entry = state
            .changes
            .iter()
            .find(|entry| entry.id == change_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("change '{change_id}' does not exist")))?;

        if entry.action != ChangeAction::Delete {
            return Err(AppError::Validation(format!(
                "change '{change_id}' is a {} and cannot be restored",
                entry.action.as_str()
            )));
        }
        if state.restored.contains(&change_id) {
            return Err(AppError::Conflict(format!(
                "change '{change_id}' was already restored"
            )));
        }

        let snapshot = entry.snapshot.ok_or_else(|| {
            AppError::Conflict(format!("change '{change_id}' has no snapshot"))
        })?;
        let record = R::from_json(snapshot, self.key_field.as_str())?;
        let id = record.record_id();
        if state.records.iter().any(|existing| existing.record_id() == id) {
            return Err(AppError::Conflict(format!(
                "record with {} '{id}' already exists",
                self.key_field.as_str()
            )));
        }

        state.records.push(record);
        state.restored.insert(change_id);
        self.log_change(&mut state, ChangeAction::Restore, &id, None);

        debug!(change_id = %change_id, id = %id, "in-memory record restored");
        Ok(id)
    }

    async fn list_changes(&self, limit: usize) -> AppResult<Vec<ChangeLogEntry>> {
        let state = self.state.read().await;
        Ok(state.changes.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use gridline_application::{ListParams, RecordGateway};
    use gridline_core::{ActorContext, AppError};
    use gridline_domain::{
        ChangeAction, ColumnFilter, FilterPredicate, Record, RecordId, SortDirection, SortKey,
        TableRecord,
    };
    use serde_json::{Map, Value, json};

    use super::InMemoryRecordGateway;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn contact(email: &str, name: &str, company: &str) -> Record {
        Record::new(
            "email",
            RecordId::from(email),
            object(json!({"name": name, "company": company})),
        )
        .unwrap_or_else(|_| unreachable!())
    }

    async fn contacts() -> InMemoryRecordGateway<Record> {
        let gateway = InMemoryRecordGateway::new(
            "email",
            vec!["name".to_owned(), "company".to_owned()],
            ActorContext::guest(),
        )
        .unwrap_or_else(|_| unreachable!());
        let seeded = gateway
            .seed(vec![
                contact("ana@example.com", "Ana", "Geolabs"),
                contact("kai@example.com", "Kai", "Harbor Works"),
                contact("lei@example.com", "Lei", "Geolabs"),
            ])
            .await;
        assert!(seeded.is_ok());
        gateway
    }

    #[tokio::test]
    async fn server_side_list_filters_sorts_and_pages() {
        let gateway = contacts().await;
        let params = ListParams {
            query: Some("geo".to_owned()),
            filters: Vec::new(),
            sort: vec![SortKey::new("name", SortDirection::Desc).unwrap_or_else(|_| unreachable!())],
            page: Some(1),
            page_size: Some(1),
        };

        let page = gateway.list(&params).await;
        assert!(page.is_ok());
        let page = page.unwrap_or_else(|_| unreachable!());
        assert_eq!(page.total, 2);
        assert_eq!(
            page.rows.iter().map(TableRecord::record_id).collect::<Vec<_>>(),
            vec![RecordId::from("lei@example.com")]
        );

        let harbor = ListParams {
            filters: vec![
                ColumnFilter::new("company", FilterPredicate::Contains("harbor".to_owned()))
                    .unwrap_or_else(|_| unreachable!()),
            ],
            ..ListParams::full_collection()
        };
        let page = gateway.list(&harbor).await.map(|page| page.total);
        assert_eq!(page, Ok(1));
    }

    #[tokio::test]
    async fn stale_versions_are_rejected() {
        let gateway = contacts().await;
        let id = RecordId::from("kai@example.com");
        let patch = object(json!({"company": "Harbor Works LLC"}));

        let updated = gateway.update(&id, &patch, Some("1")).await;
        assert!(updated.is_ok());
        assert_eq!(
            updated.ok().and_then(|record| record.version()).as_deref(),
            Some("2")
        );

        let stale = gateway.update(&id, &patch, Some("1")).await;
        assert!(matches!(stale, Err(AppError::Conflict(_))));
        let stale_delete = gateway.delete(&id, Some("1")).await;
        assert!(matches!(stale_delete, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn restore_conflicts_when_the_natural_key_is_taken_again() {
        let gateway = contacts().await;
        let id = RecordId::from("ana@example.com");

        let receipt = gateway.delete(&id, None).await.unwrap_or_default();
        let change_id = receipt.change_id;
        assert!(change_id.is_some());
        let change_id = change_id.unwrap_or_else(|| unreachable!());

        let recreated = gateway.create(&contact("ana@example.com", "Ana B", "Geolabs")).await;
        assert!(recreated.is_ok());
        assert!(matches!(
            gateway.restore(change_id).await,
            Err(AppError::Conflict(_))
        ));

        assert!(gateway.delete(&id, None).await.is_ok());
        assert_eq!(gateway.restore(change_id).await, Ok(id.clone()));
        assert!(matches!(
            gateway.restore(change_id).await,
            Err(AppError::Conflict(_))
        ));

        let history = gateway.list_changes(10).await.unwrap_or_default();
        assert_eq!(history.first().map(|entry| entry.action), Some(ChangeAction::Restore));
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn provisional_drafts_receive_sequential_ids() {
        let gateway = InMemoryRecordGateway::<Record>::new("id", Vec::new(), ActorContext::guest())
            .unwrap_or_else(|_| unreachable!());
        let draft = Record::draft("id", object(json!({"project": "Ala Wai canal"})))
            .unwrap_or_else(|_| unreachable!());

        let first = gateway.create(&draft).await.ok().flatten();
        let second = gateway.create(&draft).await.ok().flatten();
        assert_eq!(first.map(|record| record.record_id()), Some(RecordId::Number(1)));
        assert_eq!(second.map(|record| record.record_id()), Some(RecordId::Number(2)));
    }
}
