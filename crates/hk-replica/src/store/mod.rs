//! Local Replica Store: the device's copy of the server tables plus its
//! notification log and preferences, kept in SQLite.

mod mapper;
mod queries;
mod typed;

pub use typed::*;

use crate::error::AppError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hk_core::model::{Replicated, SyncStatus, Table};
use hk_core::notification::Notification;
use mapper::{map_notification_row, map_replica_row};
use queries::*;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::str::FromStr;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const ALERT_DEPARTMENTS_KEY: &str = "alert_departments";

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaRow {
    pub local_id: i64,
    pub table: Table,
    pub remote_id: Option<i64>,
    pub sync_status: SyncStatus,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

impl ReplicaRow {
    pub fn decode<T: Replicated>(&self) -> Result<T, AppError> {
        if self.table != T::TABLE {
            return Err(AppError::Internal(format!(
                "row {} belongs to {}, not {}",
                self.local_id,
                self.table,
                T::TABLE
            )));
        }
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted { local_id: i64 },
    Updated { local_id: i64 },
    /// A local edit is still waiting to be pushed; the server copy was ignored.
    SkippedUnsynced { local_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAttachment {
    pub file_name: String,
    pub content_type: String,
    pub content: Bytes,
}

#[async_trait]
pub trait ReplicaStore: Send + Sync {
    async fn insert_local(
        &self,
        table: Table,
        data: &Value,
        status: SyncStatus,
    ) -> Result<ReplicaRow, AppError>;
    async fn get(&self, local_id: i64) -> Result<Option<ReplicaRow>, AppError>;
    async fn find_by_remote_id(
        &self,
        table: Table,
        remote_id: i64,
    ) -> Result<Option<ReplicaRow>, AppError>;
    async fn list(&self, table: Table) -> Result<Vec<ReplicaRow>, AppError>;
    async fn list_unsynced(&self, table: Table) -> Result<Vec<ReplicaRow>, AppError>;
    async fn count_unsynced(&self) -> Result<u64, AppError>;
    async fn apply_remote(&self, table: Table, data: &Value) -> Result<ApplyOutcome, AppError>;
    async fn replace_table(&self, table: Table, rows: &[Value]) -> Result<usize, AppError>;
    async fn prune_missing(&self, table: Table, keep: &BTreeSet<i64>) -> Result<u64, AppError>;
    async fn update_row(
        &self,
        local_id: i64,
        data: &Value,
        status: SyncStatus,
    ) -> Result<(), AppError>;
    async fn mark_synced(&self, local_id: i64) -> Result<(), AppError>;

    async fn add_attachment(
        &self,
        local_id: i64,
        attachment: &PendingAttachment,
    ) -> Result<(), AppError>;
    async fn list_attachments(&self, local_id: i64) -> Result<Vec<PendingAttachment>, AppError>;
    async fn clear_attachments(&self, local_id: i64) -> Result<(), AppError>;

    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError>;
    async fn list_notifications(&self, limit: u32) -> Result<Vec<Notification>, AppError>;
    async fn mark_notification_read(&self, id: &str) -> Result<bool, AppError>;
    async fn prune_notifications(&self, before: DateTime<Utc>) -> Result<u64, AppError>;

    async fn alert_departments(&self) -> Result<BTreeSet<i64>, AppError>;
    async fn set_alert_departments(&self, departments: &BTreeSet<i64>) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SqliteReplicaStore {
    pool: SqlitePool,
}

impl SqliteReplicaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the replica database and applies migrations.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Configuration(format!(
                        "cannot create replica directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn remote_id_of(data: &Value) -> Option<i64> {
    data.get("id").and_then(Value::as_i64)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl ReplicaStore for SqliteReplicaStore {
    async fn insert_local(
        &self,
        table: Table,
        data: &Value,
        status: SyncStatus,
    ) -> Result<ReplicaRow, AppError> {
        let row = sqlx::query(INSERT_ROW)
            .bind(table.as_str())
            .bind(remote_id_of(data))
            .bind(status.as_str())
            .bind(serde_json::to_string(data)?)
            .bind(now_millis())
            .fetch_one(&self.pool)
            .await?;
        map_replica_row(&row)
    }

    async fn get(&self, local_id: i64) -> Result<Option<ReplicaRow>, AppError> {
        let row = sqlx::query(SELECT_ROW_BY_LOCAL_ID)
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_replica_row).transpose()
    }

    async fn find_by_remote_id(
        &self,
        table: Table,
        remote_id: i64,
    ) -> Result<Option<ReplicaRow>, AppError> {
        let row = sqlx::query(SELECT_ROW_BY_REMOTE_ID)
            .bind(table.as_str())
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_replica_row).transpose()
    }

    async fn list(&self, table: Table) -> Result<Vec<ReplicaRow>, AppError> {
        let rows = sqlx::query(SELECT_ROWS_BY_TABLE)
            .bind(table.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_replica_row).collect()
    }

    async fn list_unsynced(&self, table: Table) -> Result<Vec<ReplicaRow>, AppError> {
        let rows = sqlx::query(SELECT_UNSYNCED_ROWS)
            .bind(table.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_replica_row).collect()
    }

    async fn count_unsynced(&self) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar(COUNT_UNSYNCED_ROWS)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn apply_remote(&self, table: Table, data: &Value) -> Result<ApplyOutcome, AppError> {
        let remote_id = remote_id_of(data)
            .ok_or_else(|| AppError::Integrity(format!("{table} row without an id")))?;
        let encoded = serde_json::to_string(data)?;
        let now = now_millis();

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(SELECT_ROW_BY_REMOTE_ID)
            .bind(table.as_str())
            .bind(remote_id)
            .fetch_optional(&mut *tx)
            .await?
            .as_ref()
            .map(map_replica_row)
            .transpose()?;

        let outcome = match existing {
            Some(row) if !row.sync_status.is_synced() => ApplyOutcome::SkippedUnsynced {
                local_id: row.local_id,
            },
            Some(row) => {
                sqlx::query(UPDATE_ROW)
                    .bind(row.local_id)
                    .bind(remote_id)
                    .bind(SyncStatus::Synced.as_str())
                    .bind(&encoded)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                ApplyOutcome::Updated {
                    local_id: row.local_id,
                }
            }
            None => {
                let row = sqlx::query(INSERT_ROW)
                    .bind(table.as_str())
                    .bind(remote_id)
                    .bind(SyncStatus::Synced.as_str())
                    .bind(&encoded)
                    .bind(now)
                    .fetch_one(&mut *tx)
                    .await?;
                ApplyOutcome::Inserted {
                    local_id: row.try_get("local_id")?,
                }
            }
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn replace_table(&self, table: Table, rows: &[Value]) -> Result<usize, AppError> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;
        sqlx::query(DELETE_ROWS_BY_TABLE)
            .bind(table.as_str())
            .execute(&mut *tx)
            .await?;
        for data in rows {
            sqlx::query(INSERT_ROW)
                .bind(table.as_str())
                .bind(remote_id_of(data))
                .bind(SyncStatus::Synced.as_str())
                .bind(serde_json::to_string(data)?)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    async fn prune_missing(&self, table: Table, keep: &BTreeSet<i64>) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let synced = sqlx::query(SELECT_SYNCED_REMOTE_IDS)
            .bind(table.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let mut removed = 0;
        for row in synced {
            let remote_id: i64 = row.try_get("remote_id")?;
            if keep.contains(&remote_id) {
                continue;
            }
            let local_id: i64 = row.try_get("local_id")?;
            removed += sqlx::query(DELETE_ROW)
                .bind(local_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn update_row(
        &self,
        local_id: i64,
        data: &Value,
        status: SyncStatus,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query(SELECT_ROW_BY_LOCAL_ID)
            .bind(local_id)
            .fetch_optional(&mut *tx)
            .await?
            .as_ref()
            .map(map_replica_row)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("replica row {local_id}")))?;

        let remote_id = remote_id_of(data).or(current.remote_id);
        if let Some(remote_id) = remote_id {
            // A receipt may have stored the server copy before the write response arrived.
            sqlx::query(DELETE_DUPLICATE_REMOTE_ROW)
                .bind(current.table.as_str())
                .bind(remote_id)
                .bind(local_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(UPDATE_ROW)
            .bind(local_id)
            .bind(remote_id)
            .bind(status.as_str())
            .bind(serde_json::to_string(data)?)
            .bind(now_millis())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_synced(&self, local_id: i64) -> Result<(), AppError> {
        let result = sqlx::query(MARK_ROW_SYNCED)
            .bind(local_id)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("replica row {local_id}")));
        }
        Ok(())
    }

    async fn add_attachment(
        &self,
        local_id: i64,
        attachment: &PendingAttachment,
    ) -> Result<(), AppError> {
        sqlx::query(INSERT_ATTACHMENT)
            .bind(local_id)
            .bind(&attachment.file_name)
            .bind(&attachment.content_type)
            .bind(attachment.content.as_ref())
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_attachments(&self, local_id: i64) -> Result<Vec<PendingAttachment>, AppError> {
        let rows = sqlx::query(SELECT_ATTACHMENTS)
            .bind(local_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let content: Vec<u8> = row.try_get("content")?;
                Ok(PendingAttachment {
                    file_name: row.try_get("file_name")?,
                    content_type: row.try_get("content_type")?,
                    content: Bytes::from(content),
                })
            })
            .collect()
    }

    async fn clear_attachments(&self, local_id: i64) -> Result<(), AppError> {
        sqlx::query(DELETE_ATTACHMENTS)
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        sqlx::query(INSERT_NOTIFICATION)
            .bind(&notification.id)
            .bind(notification.topic.as_str())
            .bind(notification.channel.to_string())
            .bind(&notification.title)
            .bind(&notification.body)
            .bind(serde_json::to_string(&notification.data)?)
            .bind(notification.read)
            .bind(notification.timestamp.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_notifications(&self, limit: u32) -> Result<Vec<Notification>, AppError> {
        let rows = sqlx::query(SELECT_RECENT_NOTIFICATIONS)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_notification_row).collect()
    }

    async fn mark_notification_read(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(MARK_NOTIFICATION_READ)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn prune_notifications(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(DELETE_NOTIFICATIONS_BEFORE)
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn alert_departments(&self) -> Result<BTreeSet<i64>, AppError> {
        let value: Option<String> = sqlx::query_scalar(SELECT_PREFERENCE)
            .bind(ALERT_DEPARTMENTS_KEY)
            .fetch_optional(&self.pool)
            .await?;
        match value {
            Some(value) => Ok(serde_json::from_str(&value)?),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn set_alert_departments(&self, departments: &BTreeSet<i64>) -> Result<(), AppError> {
        sqlx::query(UPSERT_PREFERENCE)
            .bind(ALERT_DEPARTMENTS_KEY)
            .bind(serde_json::to_string(departments)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::SqliteReplicaStore;
    use sqlx::sqlite::SqlitePoolOptions;

    pub(crate) async fn memory_store() -> SqliteReplicaStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let store = SqliteReplicaStore::new(pool);
        store.migrate().await.expect("replica migrations");
        store
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::memory_store;
    use super::*;
    use chrono::Duration;
    use hk_core::channel::{ChannelId, Topic};
    use serde_json::json;

    #[tokio::test]
    async fn apply_remote_preserves_local_identity() {
        let store = memory_store().await;

        let first = store
            .apply_remote(Table::Rooms, &json!({ "id": 9, "status": "dirty" }))
            .await
            .unwrap();
        let ApplyOutcome::Inserted { local_id } = first else {
            panic!("expected insert, got {first:?}");
        };

        let second = store
            .apply_remote(Table::Rooms, &json!({ "id": 9, "status": "clean" }))
            .await
            .unwrap();
        assert_eq!(second, ApplyOutcome::Updated { local_id });

        let rows = store.list(Table::Rooms).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["status"], "clean");
        assert_eq!(rows[0].remote_id, Some(9));
    }

    #[tokio::test]
    async fn apply_remote_keeps_unsent_edits() {
        let store = memory_store().await;
        let local = store
            .insert_local(
                Table::Tasks,
                &json!({ "id": 3, "title": "mine" }),
                SyncStatus::Pending,
            )
            .await
            .unwrap();

        let outcome = store
            .apply_remote(Table::Tasks, &json!({ "id": 3, "title": "theirs" }))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::SkippedUnsynced {
                local_id: local.local_id
            }
        );
        let row = store.get(local.local_id).await.unwrap().unwrap();
        assert_eq!(row.data["title"], "mine");
    }

    #[tokio::test]
    async fn apply_remote_requires_an_id() {
        let store = memory_store().await;
        let err = store
            .apply_remote(Table::Tasks, &json!({ "title": "orphan" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
    }

    #[tokio::test]
    async fn replace_table_swaps_contents_atomically() {
        let store = memory_store().await;
        store
            .replace_table(Table::Centers, &[json!({ "id": 1 }), json!({ "id": 2 })])
            .await
            .unwrap();
        store
            .replace_table(Table::Centers, &[json!({ "id": 3 })])
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list(Table::Centers)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.remote_id)
            .collect();
        assert_eq!(ids, vec![Some(3)]);
    }

    #[tokio::test]
    async fn prune_missing_only_touches_synced_rows() {
        let store = memory_store().await;
        store
            .apply_remote(Table::Tasks, &json!({ "id": 1 }))
            .await
            .unwrap();
        store
            .apply_remote(Table::Tasks, &json!({ "id": 2 }))
            .await
            .unwrap();
        store
            .insert_local(Table::Tasks, &json!({ "title": "draft" }), SyncStatus::New)
            .await
            .unwrap();

        let removed = store
            .prune_missing(Table::Tasks, &BTreeSet::from([1]))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let rows = store.list(Table::Tasks).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|row| row.remote_id == Some(1)));
        assert!(rows.iter().any(|row| row.sync_status == SyncStatus::New));
    }

    #[tokio::test]
    async fn update_row_absorbs_a_copy_stored_by_receipt() {
        let store = memory_store().await;
        let local = store
            .insert_local(Table::Tasks, &json!({ "title": "new" }), SyncStatus::New)
            .await
            .unwrap();
        store
            .apply_remote(Table::Tasks, &json!({ "id": 42, "title": "new" }))
            .await
            .unwrap();

        store
            .update_row(
                local.local_id,
                &json!({ "id": 42, "title": "new" }),
                SyncStatus::Synced,
            )
            .await
            .unwrap();

        let rows = store.list(Table::Tasks).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].local_id, local.local_id);
        assert_eq!(rows[0].remote_id, Some(42));
    }

    #[tokio::test]
    async fn mark_synced_reports_missing_rows() {
        let store = memory_store().await;
        assert!(matches!(
            store.mark_synced(99).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn attachments_follow_their_row() {
        let store = memory_store().await;
        let local = store
            .insert_local(Table::Tasks, &json!({ "title": "leak" }), SyncStatus::New)
            .await
            .unwrap();
        let attachment = PendingAttachment {
            file_name: "photo.jpg".into(),
            content_type: "image/jpeg".into(),
            content: Bytes::from_static(b"\xff\xd8"),
        };
        store
            .add_attachment(local.local_id, &attachment)
            .await
            .unwrap();
        assert_eq!(
            store.list_attachments(local.local_id).await.unwrap(),
            vec![attachment]
        );

        store.clear_attachments(local.local_id).await.unwrap();
        assert!(store
            .list_attachments(local.local_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn notifications_are_listed_newest_first_and_pruned() {
        let store = memory_store().await;
        let now = Utc::now();
        for (id, age) in [("old", 30), ("new", 1)] {
            store
                .insert_notification(&Notification {
                    id: id.into(),
                    topic: Topic::Rooms,
                    timestamp: now - Duration::hours(age),
                    title: "Room".into(),
                    body: "changed".into(),
                    channel: ChannelId::new(Topic::Rooms, 1, 0),
                    data: json!({ "id": 1 }),
                    read: false,
                })
                .await
                .unwrap();
        }

        let listed = store.list_notifications(10).await.unwrap();
        assert_eq!(listed[0].id, "new");
        assert_eq!(listed[1].channel, ChannelId::new(Topic::Rooms, 1, 0));

        assert!(store.mark_notification_read("new").await.unwrap());
        assert!(!store.mark_notification_read("missing").await.unwrap());

        let removed = store
            .prune_notifications(now - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let listed = store.list_notifications(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].read);
    }

    #[tokio::test]
    async fn alert_departments_round_trip_through_preferences() {
        let store = memory_store().await;
        assert!(store.alert_departments().await.unwrap().is_empty());

        store
            .set_alert_departments(&BTreeSet::from([4, 7]))
            .await
            .unwrap();
        store
            .set_alert_departments(&BTreeSet::from([7]))
            .await
            .unwrap();
        assert_eq!(
            store.alert_departments().await.unwrap(),
            BTreeSet::from([7])
        );
    }
}
