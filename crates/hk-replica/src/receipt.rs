//! Client-side handling of delivered push messages.

use crate::error::AppError;
use crate::remote::RemoteApi;
use crate::store::{ApplyOutcome, ReplicaStore};
use chrono::{DateTime, Duration, Utc};
use hk_core::notification::{Notification, PushMessage};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub notification: Notification,
    pub should_alert: bool,
}

/// Departments the user wants alerts for. Empty means every department.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertPreferences {
    pub departments: BTreeSet<i64>,
}

impl AlertPreferences {
    pub fn should_alert(&self, department_id: Option<i64>) -> bool {
        match department_id {
            _ if self.departments.is_empty() => true,
            Some(id) => self.departments.contains(&id),
            None => true,
        }
    }
}

pub struct NotificationReceiver {
    store: Arc<dyn ReplicaStore>,
    remote: Arc<dyn RemoteApi>,
    retention: Duration,
    events: broadcast::Sender<Received>,
}

impl NotificationReceiver {
    pub fn new(
        store: Arc<dyn ReplicaStore>,
        remote: Arc<dyn RemoteApi>,
        retention_hours: u64,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let retention = i64::try_from(retention_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or_else(|| Duration::days(365));
        Self {
            store,
            remote,
            retention,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Received> {
        self.events.subscribe()
    }

    /// Applies a delivered push message: upserts the changed row, logs the
    /// notification and tells listeners whether to alert.
    pub async fn receive(&self, payload: &[u8]) -> Result<Received, AppError> {
        let message: PushMessage = serde_json::from_slice(payload)?;
        let envelope = message.data.notification;
        let entity = envelope.entity;

        let data = match envelope.snapshot.clone() {
            Some(snapshot) => snapshot,
            None => self
                .remote
                .fetch_one(entity.table, entity.id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("{} {} is no longer visible", entity.table, entity.id))
                })?,
        };

        match self.store.apply_remote(entity.table, &data).await? {
            ApplyOutcome::SkippedUnsynced { local_id } => tracing::info!(
                table = %entity.table,
                local_id,
                remote_id = entity.id,
                "kept unsent local edit over notified change"
            ),
            ApplyOutcome::Inserted { local_id } | ApplyOutcome::Updated { local_id } => {
                tracing::debug!(
                    table = %entity.table,
                    local_id,
                    remote_id = entity.id,
                    "notified change applied"
                )
            }
        }

        let notification = Notification::from_envelope(&envelope, data);
        self.store.insert_notification(&notification).await?;

        let preferences = self.preferences().await?;
        let received = Received {
            should_alert: preferences.should_alert(entity.department_id),
            notification,
        };
        let _ = self.events.send(received.clone());
        Ok(received)
    }

    pub async fn preferences(&self) -> Result<AlertPreferences, AppError> {
        Ok(AlertPreferences {
            departments: self.store.alert_departments().await?,
        })
    }

    pub async fn set_preferences(&self, preferences: &AlertPreferences) -> Result<(), AppError> {
        self.store
            .set_alert_departments(&preferences.departments)
            .await
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<Notification>, AppError> {
        self.store.list_notifications(limit).await
    }

    pub async fn mark_read(&self, id: &str) -> Result<bool, AppError> {
        self.store.mark_notification_read(id).await
    }

    /// Deletes notifications older than the retention window.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let removed = self.store.prune_notifications(now - self.retention).await?;
        if removed > 0 {
            tracing::info!(removed, "expired notifications removed");
        }
        Ok(removed)
    }
}
