use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use gridline_core::{ActorContext, AppError, AppResult};
use gridline_domain::{
    ChangeAction, ChangeId, ChangeLogEntry, FilterState, PageState, Record, RecordId,
    RecordPatch, SortState, TableRecord, VERSION_FIELD,
};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use crate::notice::{Notice, NoticeLevel, NoticeSink};
use crate::record_ports::{
    BulkDeleteReceipt, DataSourceMode, DeleteReceipt, ListPage, ListParams, RecordGateway,
};

use super::{DataTableController, ExportScope, RefreshOutcome, TableControllerConfig};

#[derive(Default)]
struct RecordingNoticeSink {
    notices: StdMutex<Vec<Notice>>,
}

impl NoticeSink for RecordingNoticeSink {
    fn publish(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

impl RecordingNoticeSink {
    fn all(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|notices| notices.clone())
            .unwrap_or_default()
    }

    fn count(&self, level: NoticeLevel) -> usize {
        self.all()
            .iter()
            .filter(|notice| notice.level == level)
            .count()
    }
}

#[derive(Default)]
struct FakeRecordGateway {
    records: Mutex<Vec<Record>>,
    deleted: Mutex<HashMap<ChangeId, Record>>,
    next_change_id: Mutex<i64>,
    next_record_id: Mutex<i64>,
    failing_ids: Mutex<HashSet<RecordId>>,
    fail_bulk_delete: Mutex<bool>,
    fail_create: Mutex<bool>,
    reported_total: Mutex<Option<usize>>,
    seen_params: Mutex<Vec<ListParams>>,
    seen_history_limits: Mutex<Vec<usize>>,
    create_calls: AtomicUsize,
}

impl FakeRecordGateway {
    fn seeded(records: Vec<Record>) -> Self {
        Self {
            records: Mutex::new(records),
            next_change_id: Mutex::new(42),
            next_record_id: Mutex::new(100),
            ..Self::default()
        }
    }

    async fn fail_for(&self, id: i64) {
        self.failing_ids.lock().await.insert(RecordId::Number(id));
    }

    async fn rejects(&self, id: &RecordId) -> bool {
        self.failing_ids.lock().await.contains(id)
    }
}

#[async_trait]
impl RecordGateway<Record> for FakeRecordGateway {
    async fn list(&self, params: &ListParams) -> AppResult<ListPage<Record>> {
        self.seen_params.lock().await.push(params.clone());
        let rows = self.records.lock().await.clone();
        let Some(total) = *self.reported_total.lock().await else {
            let total = rows.len();
            let rows = match (params.page, params.page_size) {
                (Some(page), Some(page_size)) => rows
                    .into_iter()
                    .skip(page.saturating_sub(1) * page_size)
                    .take(page_size)
                    .collect(),
                _ => rows,
            };
            return Ok(ListPage { rows, total });
        };
        Ok(ListPage { rows, total })
    }

    async fn create(&self, record: &Record) -> AppResult<Option<Record>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_create.lock().await {
            return Err(AppError::Upstream {
                status: 500,
                message: "insert failed".to_owned(),
            });
        }

        let mut next_record_id = self.next_record_id.lock().await;
        let mut created = record.clone();
        created.set_record_id(RecordId::Number(*next_record_id));
        created.set_field(VERSION_FIELD, json!(1));
        *next_record_id += 1;

        self.records.lock().await.push(created.clone());
        Ok(Some(created))
    }

    async fn update(
        &self,
        id: &RecordId,
        patch: &RecordPatch,
        _expected_version: Option<&str>,
    ) -> AppResult<Record> {
        if self.rejects(id).await {
            return Err(AppError::Conflict(
                "record was modified by another user".to_owned(),
            ));
        }

        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|record| &record.record_id() == id)
            .ok_or_else(|| AppError::NotFound(format!("record '{id}' does not exist")))?;
        record.apply_patch(patch);
        let version = record
            .field(VERSION_FIELD)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        record.set_field(VERSION_FIELD, json!(version + 1));
        Ok(record.clone())
    }

    async fn delete(
        &self,
        id: &RecordId,
        _expected_version: Option<&str>,
    ) -> AppResult<DeleteReceipt> {
        if self.rejects(id).await {
            return Err(AppError::Upstream {
                status: 500,
                message: "database unavailable".to_owned(),
            });
        }

        let mut records = self.records.lock().await;
        let position = records
            .iter()
            .position(|record| &record.record_id() == id)
            .ok_or_else(|| AppError::NotFound(format!("record '{id}' does not exist")))?;
        let removed = records.remove(position);

        let mut next_change_id = self.next_change_id.lock().await;
        let change_id = ChangeId::new(*next_change_id);
        *next_change_id += 1;
        self.deleted.lock().await.insert(change_id, removed);

        Ok(DeleteReceipt {
            change_id: Some(change_id),
            message: Some("deleted".to_owned()),
        })
    }

    async fn bulk_delete(&self, ids: &[RecordId]) -> AppResult<BulkDeleteReceipt> {
        if *self.fail_bulk_delete.lock().await {
            return Err(AppError::Transport("connection reset".to_owned()));
        }

        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|record| !ids.contains(&record.record_id()));
        Ok(BulkDeleteReceipt {
            deleted: before - records.len(),
            message: None,
        })
    }

    async fn restore(&self, change_id: ChangeId) -> AppResult<RecordId> {
        let record = self
            .deleted
            .lock()
            .await
            .remove(&change_id)
            .ok_or_else(|| AppError::Conflict(format!("change '{change_id}' cannot be restored")))?;
        let id = record.record_id();
        self.records.lock().await.push(record);
        Ok(id)
    }

    async fn list_changes(&self, limit: usize) -> AppResult<Vec<ChangeLogEntry>> {
        self.seen_history_limits.lock().await.push(limit);
        Ok(vec![ChangeLogEntry {
            id: ChangeId::new(42),
            action: ChangeAction::Delete,
            record_id: Some(RecordId::Number(7)),
            snapshot: None,
            actor: Some("guest".to_owned()),
            timestamp: Utc::now(),
        }])
    }
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn id(value: i64) -> RecordId {
    RecordId::Number(value)
}

fn core_box(number: i64, project: &str) -> Record {
    Record::new(
        "id",
        id(number),
        fields(json!({"project": project, "island": "Oahu", "row_version": 1})),
    )
    .unwrap_or_else(|_| unreachable!())
}

fn seeded_gateway() -> Arc<FakeRecordGateway> {
    Arc::new(FakeRecordGateway::seeded(vec![
        core_box(5, "H-1 widening"),
        core_box(7, "Kailua seawall"),
        core_box(9, "Hilo bridge"),
    ]))
}

fn build_controller(
    gateway: Arc<FakeRecordGateway>,
    notices: Arc<RecordingNoticeSink>,
    mode: DataSourceMode,
) -> DataTableController<Record> {
    build_paged_controller(gateway, notices, mode, PageState::default())
}

fn build_paged_controller(
    gateway: Arc<FakeRecordGateway>,
    notices: Arc<RecordingNoticeSink>,
    mode: DataSourceMode,
    page: PageState,
) -> DataTableController<Record> {
    let gateway: Arc<dyn RecordGateway<Record>> = gateway;
    DataTableController::new(
        gateway,
        notices,
        ActorContext::guest(),
        TableControllerConfig {
            resource_label: "core box".to_owned(),
            mode,
            required_fields: vec!["project".to_owned()],
        },
        FilterState::searching(["project", "island"]),
        SortState::unsorted(),
        page,
    )
}

async fn loaded_controller(
    gateway: Arc<FakeRecordGateway>,
    notices: Arc<RecordingNoticeSink>,
) -> DataTableController<Record> {
    let mut controller = build_controller(gateway, notices, DataSourceMode::ClientSide);
    assert!(controller.refresh().await.is_ok());
    controller
}

#[tokio::test]
async fn refresh_loads_rows_and_search_narrows_the_view() {
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(seeded_gateway(), notices).await;

    assert_eq!(controller.records().len(), 3);
    controller.set_query("kailua");
    let window = controller.view();
    assert_eq!(window.total_count, 1);
    assert_eq!(window.visible_ids(), vec![id(7)]);
}

#[tokio::test]
async fn delete_then_restore_reinserts_the_same_row_in_place() {
    let gateway = seeded_gateway();
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway.clone(), notices.clone()).await;
    let original = controller.records().get(&id(7)).cloned();

    let outcome = controller.delete(&id(7)).await;
    assert!(outcome.is_ok());
    let outcome = outcome.unwrap_or_else(|_| unreachable!());
    assert_eq!(
        outcome.undo.map(|offer| offer.change_id()),
        Some(ChangeId::new(42))
    );
    assert!(!controller.records().contains(&id(7)));
    assert_eq!(
        notices.all().last().and_then(|notice| notice.undo),
        outcome.undo
    );

    let restored = controller.restore(ChangeId::new(42)).await;
    assert_eq!(restored, Ok(id(7)));
    assert_eq!(controller.records().position(&id(7)), Some(1));
    assert_eq!(controller.records().get(&id(7)).cloned(), original);
    assert_eq!(controller.undo_offer(), None);
}

#[tokio::test]
async fn undo_restores_inside_the_window_and_refuses_after_it() {
    let gateway = seeded_gateway();
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway, notices.clone()).await;

    assert!(controller.delete(&id(5)).await.is_ok());
    let undone = controller.undo(Utc::now()).await;
    assert_eq!(undone, Ok(Some(id(5))));
    assert_eq!(controller.records().position(&id(5)), Some(0));

    assert!(controller.delete(&id(9)).await.is_ok());
    let expires_at = controller
        .undo_offer()
        .map(|offer| offer.expires_at())
        .unwrap_or_else(Utc::now);
    let expired = controller.undo(expires_at + Duration::seconds(1)).await;
    assert!(matches!(expired, Err(AppError::Validation(_))));
    assert!(!controller.records().contains(&id(9)));
    assert_eq!(controller.undo(Utc::now()).await, Ok(None));
    assert_eq!(notices.count(NoticeLevel::Error), 1);
}

#[tokio::test]
async fn rejected_update_rolls_back_the_optimistic_patch() {
    let gateway = seeded_gateway();
    gateway.fail_for(9).await;
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway, notices.clone()).await;

    let result = controller
        .update(&id(9), fields(json!({"project": "Hilo harbor"})))
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(
        controller
            .records()
            .get(&id(9))
            .and_then(|record| record.field("project").cloned()),
        Some(json!("Hilo bridge"))
    );
    assert_eq!(notices.count(NoticeLevel::Error), 1);
}

#[tokio::test]
async fn accepted_update_takes_the_server_version() {
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(seeded_gateway(), notices).await;

    let updated = controller
        .update(&id(5), fields(json!({"island": "Maui"})))
        .await;
    assert!(updated.is_ok());
    let stored = controller.records().get(&id(5));
    assert_eq!(
        stored.and_then(|record| record.field("island").cloned()),
        Some(json!("Maui"))
    );
    assert_eq!(stored.and_then(|record| record.version()).as_deref(), Some("2"));
}

#[tokio::test]
async fn rejected_delete_reinserts_at_the_same_position_and_reselects() {
    let gateway = seeded_gateway();
    gateway.fail_for(7).await;
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway, notices.clone()).await;
    assert_eq!(controller.toggle_selection(id(7)), Ok(true));

    let result = controller.delete(&id(7)).await;
    assert!(matches!(result, Err(AppError::Upstream { status: 500, .. })));
    assert_eq!(controller.records().position(&id(7)), Some(1));
    assert!(controller.selection().contains(&id(7)));
    assert_eq!(controller.undo_offer(), None);
    assert!(
        notices
            .all()
            .iter()
            .any(|notice| notice.message.contains("database unavailable (HTTP 500)"))
    );
}

#[tokio::test]
async fn create_swaps_the_provisional_draft_for_the_server_row() {
    let gateway = seeded_gateway();
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway.clone(), notices).await;

    let draft = Record::draft("id", fields(json!({"project": "Ala Wai canal"})))
        .unwrap_or_else(|_| unreachable!());
    let created = controller.create(draft).await;
    assert_eq!(created, Ok(id(100)));
    assert_eq!(controller.records().position(&id(100)), Some(0));
    assert!(
        controller
            .records()
            .iter()
            .all(|record| !record.record_id().is_provisional())
    );
    assert_eq!(gateway.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_draft_never_reaches_the_gateway() {
    let gateway = seeded_gateway();
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway.clone(), notices.clone()).await;

    let draft = Record::draft("id", fields(json!({"project": "  ", "island": "Kauai"})))
        .unwrap_or_else(|_| unreachable!());
    let created = controller.create(draft).await;
    assert!(matches!(created, Err(AppError::Validation(_))));
    assert_eq!(gateway.create_calls.load(Ordering::SeqCst), 0);
    assert_eq!(controller.records().len(), 3);

    let blanked = controller
        .update(&id(5), fields(json!({"project": ""})))
        .await;
    assert!(matches!(blanked, Err(AppError::Validation(_))));
    assert_eq!(notices.count(NoticeLevel::Error), 2);
}

#[tokio::test]
async fn superseded_refresh_result_is_discarded() {
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller =
        build_controller(seeded_gateway(), notices, DataSourceMode::ClientSide);

    let stale = controller.begin_refresh();
    let current = controller.begin_refresh();
    assert!(current.generation() > stale.generation());

    let stale_result = Ok(ListPage {
        rows: vec![core_box(1, "stale")],
        total: 1,
    });
    assert_eq!(
        controller.complete_refresh(stale, stale_result),
        Ok(RefreshOutcome::Superseded)
    );
    assert!(controller.records().is_empty());

    let current_result = Ok(ListPage {
        rows: vec![core_box(2, "fresh"), core_box(3, "fresh")],
        total: 2,
    });
    assert_eq!(
        controller.complete_refresh(current, current_result),
        Ok(RefreshOutcome::Applied {
            loaded: 2,
            pruned_selection: 0
        })
    );
}

#[tokio::test]
async fn refresh_prunes_selection_of_vanished_rows() {
    let gateway = seeded_gateway();
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway.clone(), notices).await;
    assert_eq!(controller.toggle_selection(id(5)), Ok(true));
    assert_eq!(controller.toggle_selection(id(7)), Ok(true));
    assert!(controller.toggle_selection(id(404)).is_err());

    gateway
        .records
        .lock()
        .await
        .retain(|record| record.record_id() != id(7));
    let outcome = controller.refresh().await;
    assert_eq!(
        outcome,
        Ok(RefreshOutcome::Applied {
            loaded: 2,
            pruned_selection: 1
        })
    );
    assert_eq!(controller.selection().len(), 1);
    assert!(controller.selection().contains(&id(5)));
}

#[tokio::test]
async fn bulk_delete_keeps_successes_when_one_row_fails() {
    let gateway = seeded_gateway();
    gateway.fail_for(7).await;
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway, notices.clone()).await;
    controller.select_all_visible();
    assert!(controller.is_all_visible_selected());

    let outcome = controller.bulk_delete().await.unwrap_or_default();
    assert_eq!(outcome.succeeded, vec![id(5), id(9)]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, id(7));

    assert_eq!(controller.records().ids(), vec![id(7)]);
    assert_eq!(controller.selection().len(), 1);
    assert_eq!(
        controller.undo_offer().map(|offer| offer.change_id()),
        Some(ChangeId::new(43))
    );
    assert_eq!(
        notices.all().last().map(|notice| notice.level),
        Some(NoticeLevel::Error)
    );
}

#[tokio::test]
async fn bulk_update_patches_every_selected_row() {
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(seeded_gateway(), notices).await;
    assert_eq!(controller.toggle_selection(id(5)), Ok(true));
    assert_eq!(controller.toggle_selection(id(9)), Ok(true));

    let outcome = controller
        .bulk_update(fields(json!({"island": "Lanai"})))
        .await
        .unwrap_or_default();
    assert_eq!(outcome.succeeded, vec![id(5), id(9)]);
    assert!(outcome.failed.is_empty());

    let islands: Vec<Option<Value>> = controller
        .records()
        .iter()
        .map(|record| record.field("island").cloned())
        .collect();
    assert_eq!(
        islands,
        vec![Some(json!("Lanai")), Some(json!("Oahu")), Some(json!("Lanai"))]
    );
}

#[tokio::test]
async fn all_or_nothing_bulk_delete_restores_rows_in_order_on_failure() {
    let gateway = seeded_gateway();
    *gateway.fail_bulk_delete.lock().await = true;
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway.clone(), notices).await;
    assert_eq!(controller.toggle_selection(id(5)), Ok(true));
    assert_eq!(controller.toggle_selection(id(9)), Ok(true));

    let result = controller.bulk_delete_all_or_nothing().await;
    assert!(matches!(result, Err(AppError::Transport(_))));
    assert_eq!(controller.records().ids(), vec![id(5), id(7), id(9)]);
    assert_eq!(controller.selection().len(), 2);

    *gateway.fail_bulk_delete.lock().await = false;
    assert_eq!(controller.bulk_delete_all_or_nothing().await, Ok(2));
    assert_eq!(controller.records().ids(), vec![id(7)]);
    assert!(controller.selection().is_empty());
}

#[tokio::test]
async fn server_side_mode_forwards_table_state_and_uses_server_total() {
    let gateway = seeded_gateway();
    *gateway.reported_total.lock().await = Some(120);
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = build_controller(gateway.clone(), notices, DataSourceMode::ServerSide);

    controller.set_query("  seawall ");
    controller.set_page(2);
    assert!(controller.toggle_sort("project").is_ok());
    assert!(controller.refresh().await.is_ok());

    let params = gateway.seen_params.lock().await.last().cloned();
    assert!(params.is_some());
    let params = params.unwrap_or_default();
    assert_eq!(params.query.as_deref(), Some("seawall"));
    assert_eq!(params.page, Some(2));
    assert_eq!(params.page_size, Some(25));
    assert_eq!(params.sort.len(), 1);

    let window = controller.view();
    assert_eq!(window.total_count, 120);
    assert_eq!(window.total_pages, 5);
    assert_eq!(window.page, 2);
    assert_eq!(window.rows.len(), 3);
}

#[tokio::test]
async fn history_limit_is_clamped() {
    let gateway = seeded_gateway();
    let notices = Arc::new(RecordingNoticeSink::default());
    let controller = build_controller(gateway.clone(), notices, DataSourceMode::ClientSide);

    let entries = controller.history(10_000).await.unwrap_or_default();
    assert_eq!(entries.len(), 1);
    assert!(controller.history(0).await.is_ok());
    assert_eq!(*gateway.seen_history_limits.lock().await, vec![500, 1]);
}

#[tokio::test]
async fn server_side_page_past_the_end_is_clamped_and_fetched_again() {
    let gateway = Arc::new(FakeRecordGateway::seeded(
        (1..=5).map(|number| core_box(number, "Pali tunnel")).collect(),
    ));
    let notices = Arc::new(RecordingNoticeSink::default());
    let page = PageState::with_allowed_sizes(2, vec![2]).unwrap_or_default();
    let mut controller =
        build_paged_controller(gateway.clone(), notices, DataSourceMode::ServerSide, page);

    controller.set_page(10);
    let outcome = controller.refresh().await;
    assert_eq!(
        outcome,
        Ok(RefreshOutcome::Applied {
            loaded: 1,
            pruned_selection: 0
        })
    );

    let requested: Vec<Option<usize>> = gateway
        .seen_params
        .lock()
        .await
        .iter()
        .map(|params| params.page)
        .collect();
    assert_eq!(requested, vec![Some(10), Some(3)]);

    let window = controller.view();
    assert_eq!(window.page, 3);
    assert_eq!(window.total_pages, 3);
    assert_eq!(window.visible_ids(), vec![id(5)]);

    controller.set_page(1);
    assert_eq!(controller.view().page, 3);
    assert!(controller.refresh().await.is_ok());
    assert_eq!(controller.view().visible_ids(), vec![id(1), id(2)]);
}

#[tokio::test]
async fn rejected_create_removes_the_draft_and_restores_the_total() {
    let gateway = seeded_gateway();
    *gateway.reported_total.lock().await = Some(3);
    *gateway.fail_create.lock().await = true;
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = build_controller(gateway.clone(), notices.clone(), DataSourceMode::ServerSide);
    assert!(controller.refresh().await.is_ok());

    let draft = Record::draft("id", fields(json!({"project": "Makapuu lookout"})))
        .unwrap_or_else(|_| unreachable!());
    let created = controller.create(draft).await;
    assert!(matches!(created, Err(AppError::Upstream { status: 500, .. })));

    assert_eq!(controller.records().ids(), vec![id(5), id(7), id(9)]);
    assert_eq!(controller.view().total_count, 3);
    assert_eq!(notices.count(NoticeLevel::Error), 1);
    assert!(
        notices
            .all()
            .iter()
            .any(|notice| notice.message.contains("insert failed"))
    );
    assert_eq!(gateway.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_delete_snapshots_are_dropped_and_restore_reloads() {
    let gateway = seeded_gateway();
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway, notices).await;

    assert!(controller.delete(&id(5)).await.is_ok());
    assert!(controller.delete(&id(7)).await.is_ok());
    assert_eq!(controller.deleted.len(), 2);

    controller.prune_expired_restores(Utc::now());
    assert_eq!(controller.deleted.len(), 2);

    controller.prune_expired_restores(Utc::now() + Duration::seconds(7));
    assert!(controller.deleted.is_empty());

    assert_eq!(controller.restore(ChangeId::new(42)).await, Ok(id(5)));
    assert!(controller.records().contains(&id(5)));
    assert!(!controller.records().contains(&id(7)));
}

#[tokio::test]
async fn update_that_changes_the_key_keeps_the_row_selected() {
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(seeded_gateway(), notices).await;
    assert_eq!(controller.toggle_selection(id(5)), Ok(true));

    let updated = controller.update(&id(5), fields(json!({"id": 55}))).await;
    assert_eq!(updated.map(|record| record.record_id()), Ok(id(55)));

    assert!(controller.selection().contains(&id(55)));
    assert!(!controller.selection().contains(&id(5)));
    assert_eq!(controller.records().position(&id(55)), Some(0));
}

#[tokio::test]
async fn csv_export_follows_the_filtered_and_sorted_view() {
    let gateway = seeded_gateway();
    gateway
        .records
        .lock()
        .await
        .push(core_box(11, "Pier \"B\", Hilo"));
    let notices = Arc::new(RecordingNoticeSink::default());
    let mut controller = loaded_controller(gateway, notices).await;
    assert!(controller.toggle_sort("project").is_ok());

    let exported = controller
        .export_csv(&["id", "project", "engineer"], ExportScope::AllMatching)
        .unwrap_or_default();
    let lines: Vec<&str> = exported.lines().collect();
    assert_eq!(
        lines,
        vec![
            "id,project,engineer",
            "5,H-1 widening,",
            "9,Hilo bridge,",
            "7,Kailua seawall,",
            "11,\"Pier \"\"B\"\", Hilo\",",
        ]
    );

    controller.set_query("hilo");
    let page = controller
        .export_csv(&["id"], ExportScope::CurrentPage)
        .unwrap_or_default();
    assert_eq!(page.lines().collect::<Vec<_>>(), vec!["id", "9", "11"]);

    assert!(matches!(
        controller.export_csv(&[], ExportScope::CurrentPage),
        Err(AppError::Validation(_))
    ));
}
