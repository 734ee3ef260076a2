use super::ReplicaRow;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use hk_core::channel::{ChannelId, Topic};
use hk_core::model::{SyncStatus, Table};
use hk_core::notification::Notification;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(super) fn map_replica_row(row: &SqliteRow) -> Result<ReplicaRow, AppError> {
    let table_name: String = row.try_get("table_name")?;
    let sync_status: String = row.try_get("sync_status")?;
    let data: String = row.try_get("data")?;

    Ok(ReplicaRow {
        local_id: row.try_get("local_id")?,
        table: table_name
            .parse::<Table>()
            .map_err(|e| AppError::Integrity(e.to_string()))?,
        remote_id: row.try_get("remote_id")?,
        sync_status: sync_status
            .parse::<SyncStatus>()
            .map_err(AppError::Integrity)?,
        data: serde_json::from_str(&data)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

pub(super) fn map_notification_row(row: &SqliteRow) -> Result<Notification, AppError> {
    let topic: String = row.try_get("topic")?;
    let channel: String = row.try_get("channel")?;
    let data: String = row.try_get("data")?;
    let read: i64 = row.try_get("read")?;

    Ok(Notification {
        id: row.try_get("notification_id")?,
        topic: topic
            .parse::<Topic>()
            .map_err(|e| AppError::Integrity(e.to_string()))?,
        timestamp: from_millis(row.try_get("timestamp")?)?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        channel: channel
            .parse::<ChannelId>()
            .map_err(|e| AppError::Integrity(e.to_string()))?,
        data: serde_json::from_str(&data)?,
        read: read != 0,
    })
}

pub(super) fn from_millis(value: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| AppError::Integrity(format!("timestamp out of range: {value}")))
}
