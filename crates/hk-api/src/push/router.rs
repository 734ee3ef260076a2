use hk_core::channel::ChannelId;
use hk_core::grant::Grant;
use hk_core::model::{CounterRecord, Replicated, Room, Task};
use hk_core::notification::EntityRef;
use serde_json::Value;

use super::PushSubscription;

/// Channel segment used for a missing security value.
pub const UNGOVERNED_ID: i64 = 0;

/// A committed change to a replicated entity.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub entity: EntityRef,
    pub title: String,
    pub body: String,
    pub snapshot: Value,
}

impl DomainEvent {
    pub fn new<T: Replicated>(
        entity: &T,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Option<Self> {
        let entity_ref = EntityRef::of(entity)?;
        let snapshot = match serde_json::to_value(entity) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(table = %T::TABLE, error = %err, "event snapshot not encodable");
                return None;
            }
        };
        Some(Self {
            entity: entity_ref,
            title: title.into(),
            body: body.into(),
            snapshot,
        })
    }

    pub fn task(task: &Task, created: bool) -> Option<Self> {
        let title = if created { "New task" } else { "Task updated" };
        Self::new(task, title, format!("{} ({})", task.title, task.status))
    }

    pub fn counter_record(record: &CounterRecord) -> Option<Self> {
        let unit = record.counter.unit.as_deref().unwrap_or_default();
        Self::new(
            record,
            "Counter reading",
            format!("{}: {} {}", record.counter.name, record.value, unit)
                .trim_end()
                .to_string(),
        )
    }

    pub fn room(room: &Room) -> Option<Self> {
        Self::new(
            room,
            format!("Room {}", room.number),
            format!("Status: {}", room.status),
        )
    }
}

/// Maps events to channels and channels to entitled subscribers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationRouter;

impl NotificationRouter {
    /// `None` for tables that do not publish notifications.
    pub fn channel_for(&self, event: &DomainEvent) -> Option<ChannelId> {
        let topic = event.entity.table.topic()?;
        Some(ChannelId::new(
            topic,
            event.entity.center_id.unwrap_or(UNGOVERNED_ID),
            event.entity.department_id.unwrap_or(UNGOVERNED_ID),
        ))
    }

    /// A grant is entitled to a channel iff both dimensions match its ids.
    /// The `0` segment of a missing value is only matched by a wildcard.
    pub fn is_eligible(&self, channel: &ChannelId, grant: &Grant) -> bool {
        grant.covers(channel)
    }

    pub fn eligible<'a>(
        &self,
        channel: &ChannelId,
        subscriptions: &'a [(PushSubscription, Grant)],
    ) -> Vec<&'a PushSubscription> {
        subscriptions
            .iter()
            .filter(|(_, grant)| self.is_eligible(channel, grant))
            .map(|(subscription, _)| subscription)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hk_core::channel::Topic;
    use hk_core::grant::Scope;
    use hk_core::model::Table;
    use serde_json::json;

    fn event(table: Table, center: Option<i64>, department: Option<i64>) -> DomainEvent {
        DomainEvent {
            entity: EntityRef {
                table,
                id: 1,
                center_id: center,
                department_id: department,
            },
            title: "t".to_string(),
            body: "b".to_string(),
            snapshot: json!({"id": 1}),
        }
    }

    fn subscription(user_id: i64) -> PushSubscription {
        PushSubscription {
            id: user_id,
            user_id,
            endpoint: format!("https://push.example/{user_id}"),
            keys: json!({}),
            channels: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn channel_is_topic_center_department() {
        let router = NotificationRouter;
        let channel = router
            .channel_for(&event(Table::Tasks, Some(3), Some(5)))
            .unwrap();
        assert_eq!(channel, ChannelId::new(Topic::Tasks, 3, 5));
        assert_eq!(channel.to_string(), "tasks-3-5");
        assert!(router
            .channel_for(&event(Table::Centers, Some(3), None))
            .is_none());
    }

    fn users(
        router: &NotificationRouter,
        event: &DomainEvent,
        subscriptions: &[(PushSubscription, Grant)],
    ) -> Vec<i64> {
        let channel = router.channel_for(event).unwrap();
        router
            .eligible(&channel, subscriptions)
            .iter()
            .map(|s| s.user_id)
            .collect()
    }

    #[test]
    fn department_subscriber_receives_any_center_of_its_department() {
        let router = NotificationRouter;
        let subscriptions = vec![
            (subscription(1), Grant::new(Scope::Wildcard, Scope::ids([5]))),
            (subscription(2), Grant::new(Scope::ids([1]), Scope::ids([6]))),
            (subscription(3), Grant::unrestricted()),
        ];

        for center in [1, 2, 40] {
            let event = event(Table::Tasks, Some(center), Some(5));
            assert_eq!(users(&router, &event, &subscriptions), vec![1, 3]);
        }

        let event = event(Table::Tasks, Some(1), Some(6));
        assert_eq!(users(&router, &event, &subscriptions), vec![2, 3]);
    }

    #[test]
    fn missing_department_is_only_covered_by_a_department_wildcard() {
        let router = NotificationRouter;
        let subscriptions = vec![
            (subscription(1), Grant::new(Scope::Wildcard, Scope::ids([5]))),
            (subscription(2), Grant::new(Scope::ids([3]), Scope::Wildcard)),
            (subscription(3), Grant::new(Scope::ids([4]), Scope::Wildcard)),
        ];

        let event = event(Table::Tasks, Some(3), None);
        let channel = router.channel_for(&event).unwrap();
        assert_eq!(channel.to_string(), "tasks-3-0");
        assert_eq!(users(&router, &event, &subscriptions), vec![2]);
        for (subscription, grant) in &subscriptions {
            assert_eq!(
                router.is_eligible(&channel, grant),
                grant.covers(&channel),
                "user {}",
                subscription.user_id
            );
        }
    }

    #[test]
    fn room_events_follow_the_rendered_channel() {
        let router = NotificationRouter;
        let event = event(Table::Rooms, Some(1), None);
        let channel = router.channel_for(&event).unwrap();
        assert_eq!(channel.to_string(), "rooms-1-0");
        assert!(router.is_eligible(&channel, &Grant::new(Scope::ids([1]), Scope::Wildcard)));
        assert!(!router.is_eligible(&channel, &Grant::new(Scope::ids([1]), Scope::ids([6]))));
        assert!(!router.is_eligible(&channel, &Grant::new(Scope::ids([2]), Scope::Wildcard)));
    }
}
