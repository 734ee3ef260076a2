use crate::error::AppError;
use crate::remote::{PushOutcome, RemoteApi};
use crate::store::PendingAttachment;
use async_trait::async_trait;
use hk_core::model::{CounterRecordInput, RoomStatusInput, Table, TaskInput};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// In-memory server: keyset pages over seeded rows, echoing writes back.
pub(crate) struct FakeRemote {
    tables: Mutex<BTreeMap<Table, Vec<Value>>>,
    calls: Mutex<Vec<String>>,
    task_results: Mutex<VecDeque<Result<PushOutcome, AppError>>>,
    next_id: AtomicI64,
    hold: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            tables: Mutex::default(),
            calls: Mutex::default(),
            task_results: Mutex::default(),
            next_id: AtomicI64::new(1000),
            hold: Mutex::default(),
        }
    }
}

impl FakeRemote {
    pub(crate) fn seed(&self, table: Table, rows: Vec<Value>) {
        let mut rows = rows;
        rows.sort_by_key(|row| row["id"].as_i64());
        self.tables.lock().unwrap().insert(table, rows);
    }

    pub(crate) fn set_next_id(&self, id: i64) {
        self.next_id.store(id, Ordering::SeqCst);
    }

    pub(crate) fn queue_task_result(&self, result: Result<PushOutcome, AppError>) {
        self.task_results.lock().unwrap().push_back(result);
    }

    /// Makes the next page fetch signal `entered` and wait for `release`.
    pub(crate) fn hold_next_fetch(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn fetch_page(
        &self,
        table: Table,
        cursor: Option<i64>,
        rows: u32,
    ) -> Result<Vec<Value>, AppError> {
        self.record(format!("fetch:{table}"));
        let hold = self.hold.lock().unwrap().take();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }

        let tables = self.tables.lock().unwrap();
        let page = tables
            .get(&table)
            .map(|all| {
                all.iter()
                    .filter(|row| cursor.map_or(true, |c| row["id"].as_i64() > Some(c)))
                    .take(rows as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(page)
    }

    async fn fetch_one(&self, table: Table, id: i64) -> Result<Option<Value>, AppError> {
        self.record(format!("fetch-one:{table}:{id}"));
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(&table)
            .and_then(|rows| rows.iter().find(|row| row["id"] == id).cloned()))
    }

    async fn push_task(
        &self,
        remote_id: Option<i64>,
        input: &TaskInput,
        attachments: &[PendingAttachment],
    ) -> Result<PushOutcome, AppError> {
        self.record(format!("push:tasks:{remote_id:?}:{}", attachments.len()));
        if let Some(result) = self.task_results.lock().unwrap().pop_front() {
            return result;
        }
        let id = remote_id.unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(PushOutcome::Updated(json!({
            "id": id,
            "title": input.title,
            "status": input.status,
        })))
    }

    async fn push_counter_record(
        &self,
        remote_id: Option<i64>,
        input: &CounterRecordInput,
    ) -> Result<PushOutcome, AppError> {
        self.record(format!("push:counter-records:{remote_id:?}"));
        let id = remote_id.unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(PushOutcome::Updated(json!({
            "id": id,
            "counter": { "id": input.counter_id, "name": "Meter", "unit": null },
            "value": input.value,
            "recordedAt": input.recorded_at,
        })))
    }

    async fn push_room_status(
        &self,
        room_id: i64,
        input: &RoomStatusInput,
    ) -> Result<PushOutcome, AppError> {
        self.record(format!("push:rooms:{room_id}"));
        Ok(PushOutcome::Updated(json!({
            "id": room_id,
            "status": input.status,
        })))
    }

    async fn subscribe_push(&self, _subscription: &Value) -> Result<(), AppError> {
        self.record("subscribe".to_string());
        Ok(())
    }
}
