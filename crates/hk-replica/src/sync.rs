//! Sync Orchestrator: pushes local changes, then pulls the visible server
//! tables into the replica.

use crate::error::AppError;
use crate::remote::{Connectivity, PushOutcome, RemoteApi};
use crate::store::{remote_id_of, ApplyOutcome, ReplicaRow, ReplicaStore};
use crate::SERVICE_NAME;
use chrono::{DateTime, Utc};
use hk_core::metrics::{self, RESULT_ERROR, RESULT_SKIPPED, RESULT_SUCCESS};
use hk_core::model::{
    CounterRecord, CounterRecordInput, PullStrategy, Room, RoomStatusInput, SyncStatus, Table,
    Task, TaskInput,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome<T> {
    Completed(T),
    Skipped(SkipReason),
    /// Only returned by silent runs; the error was logged and counted.
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingSummary {
    pub tasks: usize,
    pub counter_records: usize,
    pub rooms: usize,
}

impl PendingSummary {
    pub fn total(&self) -> usize {
        self.tasks + self.counter_records + self.rooms
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TablesSummary {
    pub tables: usize,
    pub rows: usize,
    pub pruned: u64,
    pub kept_unsynced: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FullSyncSummary {
    pub pending: PendingSummary,
    pub tables: TablesSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatusReport {
    pub active: bool,
    pub timer_running: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_errors: u32,
    pub pending: u64,
}

#[derive(Debug, Default)]
struct SyncState {
    last_sync_at: Option<DateTime<Utc>>,
    sync_errors: u32,
}

struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Stops the periodic loop when dropped.
struct TimerHandle {
    stop: watch::Sender<bool>,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

pub struct SyncOrchestrator {
    store: Arc<dyn ReplicaStore>,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<dyn Connectivity>,
    page_rows: u32,
    interval: Duration,
    active: AtomicBool,
    state: RwLock<SyncState>,
    timer: Mutex<Option<TimerHandle>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn ReplicaStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<dyn Connectivity>,
        page_rows: u32,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            page_rows: page_rows.max(1),
            interval,
            active: AtomicBool::new(false),
            state: RwLock::new(SyncState::default()),
            timer: Mutex::new(None),
        }
    }

    /// Pushes every unsynced local row: tasks, then counter records, then rooms.
    pub async fn sync_pending(&self, silent: bool) -> Result<SyncOutcome<PendingSummary>, AppError> {
        self.guarded("pending", silent, self.push_pending()).await
    }

    /// Pulls every replicated table from the server.
    pub async fn sync_tables(&self, silent: bool) -> Result<SyncOutcome<TablesSummary>, AppError> {
        self.guarded("tables", silent, self.pull_tables()).await
    }

    /// Push then pull as one pass. The periodic timer is paused for the
    /// duration and restarted afterwards whatever the result.
    pub async fn full_sync(
        self: &Arc<Self>,
        silent: bool,
    ) -> Result<SyncOutcome<FullSyncSummary>, AppError> {
        self.stop_timer();
        let result = self
            .guarded("full", silent, async {
                let pending = self.push_pending().await?;
                let tables = self.pull_tables().await?;
                Ok::<_, AppError>(FullSyncSummary { pending, tables })
            })
            .await;
        self.start_timer();
        result
    }

    pub fn start_timer(self: &Arc<Self>) {
        let mut slot = self.timer_slot();
        if slot.is_some() {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        tokio::spawn(run_timer(Arc::downgrade(self), self.interval, stop_rx));
        *slot = Some(TimerHandle { stop });
        tracing::debug!(interval_secs = self.interval.as_secs(), "sync timer started");
    }

    /// Prevents further ticks. A pass already in flight runs to completion.
    pub fn stop_timer(&self) -> bool {
        self.timer_slot().take().is_some()
    }

    pub async fn status(&self) -> Result<SyncStatusReport, AppError> {
        let pending = self.store.count_unsynced().await?;
        let state = self.state.read().await;
        Ok(SyncStatusReport {
            active: self.active.load(Ordering::Acquire),
            timer_running: self.timer_slot().is_some(),
            last_sync_at: state.last_sync_at,
            sync_errors: state.sync_errors,
            pending,
        })
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<TimerHandle>> {
        self.timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_activate(&self) -> Option<ActiveGuard<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ActiveGuard(&self.active))
    }

    async fn guarded<T, F>(
        &self,
        phase: &'static str,
        silent: bool,
        work: F,
    ) -> Result<SyncOutcome<T>, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        if !self.connectivity.is_online().await {
            tracing::debug!(phase, "offline, sync skipped");
            metrics::inc_sync_run(SERVICE_NAME, phase, RESULT_SKIPPED);
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        let Some(_active) = self.try_activate() else {
            tracing::debug!(phase, "sync already running");
            metrics::inc_sync_run(SERVICE_NAME, phase, RESULT_SKIPPED);
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        match work.await {
            Ok(summary) => {
                self.state.write().await.last_sync_at = Some(Utc::now());
                metrics::inc_sync_run(SERVICE_NAME, phase, RESULT_SUCCESS);
                Ok(SyncOutcome::Completed(summary))
            }
            Err(err) => {
                self.state.write().await.sync_errors += 1;
                metrics::inc_sync_run(SERVICE_NAME, phase, RESULT_ERROR);
                if silent {
                    tracing::warn!(phase, error = %err, "sync failed");
                    Ok(SyncOutcome::Failed(err.to_string()))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn push_pending(&self) -> Result<PendingSummary, AppError> {
        Ok(PendingSummary {
            tasks: self.push_tasks().await?,
            counter_records: self.push_counter_records().await?,
            rooms: self.push_rooms().await?,
        })
    }

    async fn push_tasks(&self) -> Result<usize, AppError> {
        let rows = self.store.list_unsynced(Table::Tasks).await?;
        for row in &rows {
            let task: Task = row.decode()?;
            let input = TaskInput::from_task(&task);
            let attachments = self.store.list_attachments(row.local_id).await?;

            match self
                .remote
                .push_task(row.remote_id, &input, &attachments)
                .await
            {
                Ok(outcome) => self.settle(row, outcome).await?,
                Err(err) if row.remote_id.is_some() && err.is_rejection() => {
                    tracing::warn!(
                        table = %Table::Tasks,
                        local_id = row.local_id,
                        remote_id = row.remote_id,
                        error = %err,
                        "server refused task update, dropping local change"
                    );
                    self.store.mark_synced(row.local_id).await?;
                }
                Err(err) => return Err(err),
            }
            self.store.clear_attachments(row.local_id).await?;
        }
        Ok(rows.len())
    }

    async fn push_counter_records(&self) -> Result<usize, AppError> {
        let rows = self.store.list_unsynced(Table::CounterRecords).await?;
        for row in &rows {
            let record: CounterRecord = row.decode()?;
            let outcome = self
                .remote
                .push_counter_record(row.remote_id, &CounterRecordInput::from_record(&record))
                .await?;
            self.settle(row, outcome).await?;
        }
        Ok(rows.len())
    }

    async fn push_rooms(&self) -> Result<usize, AppError> {
        let rows = self.store.list_unsynced(Table::Rooms).await?;
        for row in &rows {
            let room: Room = row.decode()?;
            let input = RoomStatusInput {
                status: room.status.clone(),
            };
            let outcome = self.remote.push_room_status(room.id, &input).await?;
            self.settle(row, outcome).await?;
        }
        Ok(rows.len())
    }

    async fn settle(&self, row: &ReplicaRow, outcome: PushOutcome) -> Result<(), AppError> {
        match outcome {
            PushOutcome::Updated(data) => {
                self.store
                    .update_row(row.local_id, &data, SyncStatus::Synced)
                    .await?;
                tracing::info!(
                    table = %row.table,
                    local_id = row.local_id,
                    remote_id = remote_id_of(&data),
                    "local change pushed"
                );
            }
            PushOutcome::Gone => {
                self.store.mark_synced(row.local_id).await?;
                tracing::info!(
                    table = %row.table,
                    local_id = row.local_id,
                    remote_id = row.remote_id,
                    "row no longer exists on the server"
                );
            }
        }
        Ok(())
    }

    async fn pull_tables(&self) -> Result<TablesSummary, AppError> {
        let mut summary = TablesSummary::default();
        for &table in Table::all() {
            let rows = self.fetch_all(table).await?;
            summary.tables += 1;
            summary.rows += rows.len();

            match table.pull_strategy() {
                PullStrategy::Replace => {
                    self.store.replace_table(table, &rows).await?;
                }
                PullStrategy::UpsertById => {
                    let mut seen = BTreeSet::new();
                    for data in &rows {
                        if let Some(id) = remote_id_of(data) {
                            seen.insert(id);
                        }
                        if let ApplyOutcome::SkippedUnsynced { .. } =
                            self.store.apply_remote(table, data).await?
                        {
                            summary.kept_unsynced += 1;
                        }
                    }
                    summary.pruned += self.store.prune_missing(table, &seen).await?;
                }
            }
            tracing::debug!(table = %table, rows = rows.len(), "table pulled");
        }
        Ok(summary)
    }

    /// Walks the keyset pages of one table until the server returns an empty page.
    async fn fetch_all(&self, table: Table) -> Result<Vec<Value>, AppError> {
        let mut rows = Vec::new();
        let mut cursor: Option<i64> = None;
        loop {
            let page = self
                .remote
                .fetch_page(table, cursor, self.page_rows)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            let last_id = remote_id_of(last)
                .ok_or_else(|| AppError::Integrity(format!("{table} row without an id")))?;
            if cursor.is_some_and(|c| last_id <= c) {
                return Err(AppError::Integrity(format!(
                    "{table} pages did not advance past {last_id}"
                )));
            }
            cursor = Some(last_id);
            rows.extend(page);
        }
        Ok(rows)
    }
}

async fn run_timer(
    orchestrator: Weak<SyncOrchestrator>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        let Some(orchestrator) = orchestrator.upgrade() else {
            break;
        };
        if let Err(err) = orchestrator.sync_pending(true).await {
            tracing::warn!(error = %err, "periodic sync failed");
        }
    }
}
