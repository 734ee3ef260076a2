//! Client side of the server API.

mod connectivity;
mod http;

pub use connectivity::{ManualConnectivity, ProbeConnectivity};
pub use http::HttpRemoteApi;

use crate::error::AppError;
use crate::store::PendingAttachment;
use async_trait::async_trait;
use hk_core::model::{CounterRecordInput, RoomStatusInput, Table, TaskInput};
use serde_json::Value;

/// Result of a write the server accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The full row as the server now sees it.
    Updated(Value),
    /// The target row no longer exists on the server.
    Gone,
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// One keyset page ordered by primary key, starting after `cursor`.
    async fn fetch_page(
        &self,
        table: Table,
        cursor: Option<i64>,
        rows: u32,
    ) -> Result<Vec<Value>, AppError>;

    async fn fetch_one(&self, table: Table, id: i64) -> Result<Option<Value>, AppError>;

    /// Creates the task when `remote_id` is `None`, updates it otherwise.
    async fn push_task(
        &self,
        remote_id: Option<i64>,
        input: &TaskInput,
        attachments: &[PendingAttachment],
    ) -> Result<PushOutcome, AppError>;

    async fn push_counter_record(
        &self,
        remote_id: Option<i64>,
        input: &CounterRecordInput,
    ) -> Result<PushOutcome, AppError>;

    async fn push_room_status(
        &self,
        room_id: i64,
        input: &RoomStatusInput,
    ) -> Result<PushOutcome, AppError>;

    /// Registers this device's push subscription (`{ endpoint, keys }`).
    async fn subscribe_push(&self, subscription: &Value) -> Result<(), AppError>;
}

#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}
