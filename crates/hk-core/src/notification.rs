//! Notification records and the push message that carries them.

use crate::channel::{ChannelId, Topic};
use crate::model::{Replicated, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Largest plaintext message whose `aes128gcm` body (86-byte header, 16-byte
/// tag, 1-byte delimiter) still fits the 4096 bytes push services accept.
pub const MAX_PUSH_PAYLOAD_BYTES: usize = 4096 - 86 - 16 - 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub topic: Topic,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub channel: ChannelId,
    /// Complete entity snapshot, never a delta.
    pub data: Value,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    pub fn from_envelope(envelope: &NotificationEnvelope, data: Value) -> Self {
        Self {
            id: envelope.id.clone(),
            topic: envelope.topic,
            timestamp: envelope.timestamp,
            title: envelope.title.clone(),
            body: envelope.body.clone(),
            channel: envelope.channel,
            data,
            read: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub table: Table,
    pub id: i64,
    pub center_id: Option<i64>,
    pub department_id: Option<i64>,
}

impl EntityRef {
    /// `None` for entities that have no remote identity yet.
    pub fn of<T: Replicated>(entity: &T) -> Option<Self> {
        let id = entity.remote_id()?;
        let (center_id, department_id) = entity.security();
        Some(Self {
            table: T::TABLE,
            id,
            center_id,
            department_id,
        })
    }
}

/// Wire form of a notification inside a push message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    pub id: String,
    pub topic: Topic,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub channel: ChannelId,
    pub entity: EntityRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
}

impl NotificationEnvelope {
    pub fn new(
        channel: ChannelId,
        entity: EntityRef,
        title: impl Into<String>,
        body: impl Into<String>,
        snapshot: Option<Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: channel.topic,
            timestamp: Utc::now(),
            title: title.into(),
            body: body.into(),
            channel,
            entity,
            snapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    pub notification: NotificationEnvelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub tag: String,
    pub data: PushData,
}

impl PushMessage {
    /// Builds the transport message, dropping the embedded snapshot when the
    /// encoded message would exceed [`MAX_PUSH_PAYLOAD_BYTES`].
    pub fn compact(
        envelope: NotificationEnvelope,
        icon: Option<String>,
    ) -> serde_json::Result<Self> {
        let tag = format!("{}-{}", envelope.entity.table, envelope.entity.id);
        let mut message = Self {
            title: envelope.title.clone(),
            body: envelope.body.clone(),
            icon,
            tag,
            data: PushData {
                notification: envelope,
            },
        };

        if message.data.notification.snapshot.is_some()
            && serde_json::to_vec(&message)?.len() > MAX_PUSH_PAYLOAD_BYTES
        {
            message.data.notification.snapshot = None;
        }
        Ok(message)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(snapshot: Option<Value>) -> NotificationEnvelope {
        NotificationEnvelope::new(
            ChannelId::new(Topic::Tasks, 1, 5),
            EntityRef {
                table: Table::Tasks,
                id: 42,
                center_id: Some(1),
                department_id: Some(5),
            },
            "Task updated",
            "Replace shower head",
            snapshot,
        )
    }

    #[test]
    fn small_snapshot_travels_embedded() {
        let snapshot = json!({"id": 42, "title": "Replace shower head"});
        let message = PushMessage::compact(envelope(Some(snapshot.clone())), None).unwrap();
        assert_eq!(message.data.notification.snapshot, Some(snapshot));
        assert_eq!(message.tag, "tasks-42");
        assert!(message.encode().unwrap().len() <= MAX_PUSH_PAYLOAD_BYTES);
    }

    #[test]
    fn oversized_snapshot_falls_back_to_reference() {
        let snapshot = json!({"id": 42, "description": "x".repeat(MAX_PUSH_PAYLOAD_BYTES)});
        let message = PushMessage::compact(envelope(Some(snapshot)), None).unwrap();
        assert!(message.data.notification.snapshot.is_none());
        assert_eq!(message.data.notification.entity.id, 42);
    }

    #[test]
    fn wire_shape_uses_channel_text() {
        let message = PushMessage::compact(envelope(None), Some("/icon.png".to_string())).unwrap();
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["data"]["notification"]["channel"], "tasks-1-5");
        assert_eq!(encoded["data"]["notification"]["topic"], "tasks");
        assert_eq!(encoded["icon"], "/icon.png");
        assert!(encoded["data"]["notification"].get("snapshot").is_none());
    }

    #[test]
    fn notification_rebuilt_from_envelope_is_unread() {
        let envelope = envelope(None);
        let notification = Notification::from_envelope(&envelope, json!({"id": 42}));
        assert_eq!(notification.id, envelope.id);
        assert!(!notification.read);
        assert_eq!(notification.data["id"], 42);
    }
}
