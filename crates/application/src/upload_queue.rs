use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{AbortHandle, Abortable, Aborted};
use futures::stream::{FuturesUnordered, StreamExt};
use gridline_core::{ActorContext, AppError, AppResult};
use gridline_domain::{UploadFile, UploadItem, UploadItemId, UploadStatus};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::notice::{Notice, NoticeSink};
use crate::upload_ports::{UploadProgress, UploadRequest, UploadTransport};

/// Highest number of simultaneous uploads the portal ever used.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 3;

/// Upload queue settings.
#[derive(Debug, Clone)]
pub struct UploadQueueConfig {
    /// Maximum uploads in flight; values below one become one.
    pub concurrency: usize,
    /// Accepted lowercase extensions; empty accepts every file.
    pub allowed_extensions: Vec<String>,
    /// Extra multipart fields sent with every file.
    pub form_fields: BTreeMap<String, String>,
}

impl Default for UploadQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            allowed_extensions: Vec::new(),
            form_fields: BTreeMap::new(),
        }
    }
}

/// Files accepted and rejected by one enqueue call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnqueueOutcome {
    /// Ids of queued items, in input order.
    pub queued: Vec<UploadItemId>,
    /// Names of files refused by the extension filter.
    pub rejected: Vec<String>,
}

/// Terminal counts for items settled during one `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadRunSummary {
    /// Uploads the server accepted.
    pub done: usize,
    /// Uploads that failed.
    pub failed: usize,
    /// Uploads aborted while in flight.
    pub canceled: usize,
}

#[derive(Default)]
struct QueueState {
    items: Vec<UploadItem>,
    next_id: u64,
    in_flight: HashMap<UploadItemId, AbortHandle>,
    running: bool,
    stopping: bool,
}

impl QueueState {
    fn item_mut(&mut self, id: UploadItemId) -> AppResult<&mut UploadItem> {
        self.items
            .iter_mut()
            .find(|item| item.id() == id)
            .ok_or_else(|| AppError::NotFound(format!("upload item '{id}' does not exist")))
    }
}

/// Ends a run even when the `run` future is dropped early; uploads it started
/// are aborted and marked canceled.
struct RunGuard {
    state: Arc<Mutex<QueueState>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.running = false;
        state.stopping = false;

        let orphaned: Vec<(UploadItemId, AbortHandle)> = state.in_flight.drain().collect();
        for (item_id, handle) in &orphaned {
            handle.abort();
            if let Ok(item) = state.item_mut(*item_id) {
                let _ = item.cancel();
            }
        }

        if !orphaned.is_empty() {
            warn!(aborted = orphaned.len(), "upload run dropped with uploads in flight");
        }
    }
}

/// Bounded-fan-out upload queue. Clones share the same queue.
#[derive(Clone)]
pub struct UploadQueue {
    transport: Arc<dyn UploadTransport>,
    notices: Arc<dyn NoticeSink>,
    actor: ActorContext,
    config: Arc<UploadQueueConfig>,
    state: Arc<Mutex<QueueState>>,
}

impl UploadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        notices: Arc<dyn NoticeSink>,
        actor: ActorContext,
        mut config: UploadQueueConfig,
    ) -> Self {
        config.concurrency = config.concurrency.max(1);
        config.allowed_extensions = config
            .allowed_extensions
            .iter()
            .map(|extension| extension.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Self {
            transport,
            notices,
            actor,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Adds files to the end of the queue.
    pub fn enqueue(&self, files: Vec<UploadFile>) -> EnqueueOutcome {
        let mut outcome = EnqueueOutcome::default();
        {
            let mut state = self.lock_state();
            for file in files {
                if !self.accepts(&file) {
                    outcome.rejected.push(file.file_name().to_owned());
                    continue;
                }

                state.next_id += 1;
                let id = UploadItemId::new(state.next_id);
                state.items.push(UploadItem::queued(id, file));
                outcome.queued.push(id);
            }
        }

        if !outcome.rejected.is_empty() {
            self.notices.publish(Notice::error(
                "Some files were not queued",
                &AppError::Validation(format!(
                    "only {} files are accepted: {}",
                    self.config.allowed_extensions.join(", "),
                    outcome.rejected.join(", ")
                )),
            ));
        }

        debug!(
            queued = outcome.queued.len(),
            rejected = outcome.rejected.len(),
            "files enqueued for upload"
        );
        outcome
    }

    /// Uploads queued items until none remain or `stop_all` is called.
    pub async fn run(&self) -> AppResult<UploadRunSummary> {
        {
            let mut state = self.lock_state();
            if state.running {
                return Err(AppError::Conflict(
                    "upload queue is already running".to_owned(),
                ));
            }
            state.running = true;
            state.stopping = false;
        }

        let run_guard = RunGuard {
            state: Arc::clone(&self.state),
        };
        let mut in_flight = FuturesUnordered::new();
        let mut summary = UploadRunSummary::default();

        loop {
            while in_flight.len() < self.config.concurrency {
                let (abort_handle, abort_registration) = AbortHandle::new_pair();
                let Some(request) = self.start_next(abort_handle) else {
                    break;
                };

                let item_id = request.item_id;
                let transport = Arc::clone(&self.transport);
                let progress = self.progress_for(item_id);
                let upload = Abortable::new(
                    async move { transport.upload(request, progress).await },
                    abort_registration,
                );
                in_flight.push(async move { (item_id, upload.await) });
            }

            let Some((item_id, result)) = in_flight.next().await else {
                break;
            };
            self.settle(item_id, result, &mut summary);
        }

        drop(in_flight);
        drop(run_guard);

        info!(
            done = summary.done,
            failed = summary.failed,
            canceled = summary.canceled,
            "upload run finished"
        );
        Ok(summary)
    }

    /// Cancels a queued or in-flight item; an in-flight slot frees immediately.
    pub fn cancel(&self, item_id: UploadItemId) -> AppResult<()> {
        let mut state = self.lock_state();
        state.item_mut(item_id)?.cancel()?;
        if let Some(handle) = state.in_flight.remove(&item_id) {
            handle.abort();
        }

        debug!(item_id = %item_id, "upload canceled");
        Ok(())
    }

    /// Aborts every in-flight upload and ends the current run; queued items stay queued.
    pub fn stop_all(&self) -> usize {
        let mut state = self.lock_state();
        state.stopping = state.running;

        let aborted: Vec<UploadItemId> = state.in_flight.keys().copied().collect();
        for item_id in &aborted {
            if let Some(handle) = state.in_flight.remove(item_id) {
                handle.abort();
            }
            if let Ok(item) = state.item_mut(*item_id) {
                let _ = item.cancel();
            }
        }

        info!(aborted = aborted.len(), "upload queue stopped");
        aborted.len()
    }

    /// Moves an errored or canceled item back to queued for a later run.
    pub fn reset(&self, item_id: UploadItemId) -> AppResult<()> {
        self.lock_state().item_mut(item_id)?.reset()
    }

    /// Removes finished items and returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut state = self.lock_state();
        let before = state.items.len();
        state
            .items
            .retain(|item| item.status() != UploadStatus::Done);
        before - state.items.len()
    }

    /// Returns a copy of every item in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UploadItem> {
        self.lock_state().items.clone()
    }

    /// Returns a copy of one item.
    #[must_use]
    pub fn item(&self, item_id: UploadItemId) -> Option<UploadItem> {
        self.lock_state()
            .items
            .iter()
            .find(|item| item.id() == item_id)
            .cloned()
    }

    /// Returns how many items have the given status.
    #[must_use]
    pub fn count(&self, status: UploadStatus) -> usize {
        self.lock_state()
            .items
            .iter()
            .filter(|item| item.status() == status)
            .count()
    }

    fn accepts(&self, file: &UploadFile) -> bool {
        self.config.allowed_extensions.is_empty()
            || file
                .extension()
                .map(|extension| self.config.allowed_extensions.contains(&extension))
                .unwrap_or(false)
    }

    fn start_next(&self, abort_handle: AbortHandle) -> Option<UploadRequest> {
        let mut state = self.lock_state();
        if state.stopping {
            return None;
        }

        let item = state
            .items
            .iter_mut()
            .find(|item| item.status() == UploadStatus::Queued)?;
        item.start().ok()?;

        let request = UploadRequest {
            item_id: item.id(),
            file: item.file().clone(),
            form_fields: self.config.form_fields.clone(),
            actor: self.actor.clone(),
        };
        state.in_flight.insert(request.item_id, abort_handle);

        debug!(item_id = %request.item_id, file = request.file.file_name(), "upload started");
        Some(request)
    }

    fn progress_for(&self, item_id: UploadItemId) -> UploadProgress {
        let state = Arc::downgrade(&self.state);
        UploadProgress::new(move |percent| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Ok(item) = state.item_mut(item_id) {
                item.report_progress(percent);
            }
        })
    }

    fn settle(
        &self,
        item_id: UploadItemId,
        result: Result<AppResult<Value>, Aborted>,
        summary: &mut UploadRunSummary,
    ) {
        let mut notice = None;
        {
            let mut state = self.lock_state();
            state.in_flight.remove(&item_id);
            let Ok(item) = state.item_mut(item_id) else {
                return;
            };
            let file_name = item.file().file_name().to_owned();

            match result {
                Ok(Ok(receipt)) if item.status() == UploadStatus::Uploading => {
                    if item.complete(receipt).is_ok() {
                        summary.done += 1;
                        info!(item_id = %item_id, file = %file_name, "upload finished");
                        notice = Some(Notice::info(format!("Uploaded {file_name}")));
                    }
                }
                Ok(Err(AppError::Cancelled(_))) | Err(Aborted) => {
                    let _ = item.cancel();
                    summary.canceled += 1;
                }
                Ok(Err(error)) if item.status() == UploadStatus::Uploading => {
                    if item.fail(error.user_message()).is_ok() {
                        summary.failed += 1;
                        warn!(item_id = %item_id, file = %file_name, error = %error, "upload failed");
                        notice = Some(Notice::error(
                            format!("Upload failed for {file_name}").as_str(),
                            &error,
                        ));
                    }
                }
                Ok(_) => {
                    summary.canceled += 1;
                }
            }
        }

        if let Some(notice) = notice {
            self.notices.publish(notice);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
