use anyhow::Result;
use bytes::Bytes;
use hk_core::metrics;
use hk_core::notification::{NotificationEnvelope, PushMessage};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::{DeliveryStatus, DomainEvent, NotificationRouter, PushTransport, SubscriptionStore};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub expired: usize,
}

pub struct PushDispatcher {
    store: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn PushTransport>,
    router: NotificationRouter,
    ttl_seconds: u64,
    icon: Option<String>,
}

impl PushDispatcher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn PushTransport>,
        ttl_seconds: u64,
        icon: Option<String>,
    ) -> Self {
        Self {
            store,
            transport,
            router: NotificationRouter,
            ttl_seconds,
            icon,
        }
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// Dispatches in the background; the outcome is only logged.
    pub fn publish(self: &Arc<Self>, event: DomainEvent) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = dispatcher.dispatch(event).await {
                tracing::warn!(error = %err, "push dispatch failed");
            }
        });
    }

    /// Sends the event to every entitled subscription concurrently and waits
    /// for all of them. A failing endpoint never affects the others.
    pub async fn dispatch(&self, event: DomainEvent) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();
        let Some(channel) = self.router.channel_for(&event) else {
            return Ok(report);
        };

        let subscriptions = self.store.list_with_grants().await?;
        let targets = self.router.eligible(&channel, &subscriptions);
        if targets.is_empty() {
            tracing::debug!(channel = %channel, "no eligible subscriptions");
            return Ok(report);
        }

        let envelope = NotificationEnvelope::new(
            channel,
            event.entity,
            event.title,
            event.body,
            Some(event.snapshot),
        );
        let message = PushMessage::compact(envelope, self.icon.clone())?;
        let payload = Bytes::from(message.encode()?);

        let mut deliveries = JoinSet::new();
        for subscription in targets {
            let transport = Arc::clone(&self.transport);
            let payload = payload.clone();
            let subscription = subscription.clone();
            let ttl_seconds = self.ttl_seconds;
            deliveries.spawn(async move {
                let result = transport.send(&subscription, payload, ttl_seconds).await;
                (subscription.endpoint, result)
            });
        }

        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((_, Ok(DeliveryStatus::Delivered))) => {
                    report.delivered += 1;
                    metrics::inc_push_delivery(
                        crate::SERVICE_NAME,
                        metrics::PUSH_RESULT_DELIVERED,
                    );
                }
                Ok((endpoint, Ok(DeliveryStatus::Expired))) => {
                    report.expired += 1;
                    metrics::inc_push_delivery(crate::SERVICE_NAME, metrics::PUSH_RESULT_EXPIRED);
                    if let Err(err) = self.store.remove_endpoint(&endpoint).await {
                        tracing::warn!(
                            endpoint = %endpoint,
                            error = %err,
                            "failed to drop expired endpoint"
                        );
                    }
                }
                Ok((endpoint, Err(err))) => {
                    report.failed += 1;
                    metrics::inc_push_delivery(crate::SERVICE_NAME, metrics::PUSH_RESULT_FAILED);
                    tracing::warn!(endpoint = %endpoint, error = %err, "push delivery failed");
                }
                Err(err) => {
                    report.failed += 1;
                    metrics::inc_push_delivery(crate::SERVICE_NAME, metrics::PUSH_RESULT_FAILED);
                    tracing::warn!(error = %err, "push delivery task aborted");
                }
            }
        }

        tracing::info!(
            channel = %channel,
            delivered = report.delivered,
            failed = report.failed,
            expired = report.expired,
            "push dispatch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::PushSubscription;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;
    use hk_core::grant::{Grant, Scope};
    use hk_core::model::Table;
    use hk_core::notification::EntityRef;
    use mockall::mock;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    mock! {
        pub Transport {}

        #[async_trait]
        impl PushTransport for Transport {
            async fn send(
                &self,
                subscription: &PushSubscription,
                payload: Bytes,
                ttl_seconds: u64,
            ) -> Result<DeliveryStatus>;
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<(PushSubscription, Grant)>>,
    }

    impl MemoryStore {
        fn with(rows: Vec<(i64, &str, Grant)>) -> Self {
            let rows = rows
                .into_iter()
                .enumerate()
                .map(|(index, (user_id, endpoint, grant))| {
                    (
                        PushSubscription {
                            id: index as i64 + 1,
                            user_id,
                            endpoint: endpoint.to_string(),
                            keys: json!({}),
                            channels: Vec::new(),
                            created_at: Utc::now(),
                        },
                        grant,
                    )
                })
                .collect();
            Self {
                rows: Mutex::new(rows),
            }
        }

        fn endpoints(&self) -> Vec<String> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .map(|(s, _)| s.endpoint.clone())
                .collect()
        }
    }

    #[async_trait]
    impl SubscriptionStore for MemoryStore {
        async fn upsert(
            &self,
            _user_id: i64,
            _endpoint: &str,
            _keys: &Value,
            _channels: &[String],
        ) -> Result<PushSubscription> {
            Err(anyhow!("not used"))
        }

        async fn remove(&self, _user_id: i64, _endpoint: &str) -> Result<bool> {
            Ok(false)
        }

        async fn remove_endpoint(&self, endpoint: &str) -> Result<()> {
            self.rows
                .lock()
                .unwrap()
                .retain(|(s, _)| s.endpoint != endpoint);
            Ok(())
        }

        async fn list_with_grants(&self) -> Result<Vec<(PushSubscription, Grant)>> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn task_event(center: i64, department: i64) -> DomainEvent {
        DomainEvent {
            entity: EntityRef {
                table: Table::Tasks,
                id: 42,
                center_id: Some(center),
                department_id: Some(department),
            },
            title: "Task updated".to_string(),
            body: "Replace shower head".to_string(),
            snapshot: json!({"id": 42, "title": "Replace shower head"}),
        }
    }

    #[tokio::test]
    async fn only_entitled_subscribers_receive_the_message() {
        let store = Arc::new(MemoryStore::with(vec![
            (1, "https://push/a", Grant::new(Scope::Wildcard, Scope::ids([5]))),
            (2, "https://push/b", Grant::new(Scope::Wildcard, Scope::ids([6]))),
        ]));
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|subscription, _, ttl| subscription.endpoint == "https://push/a" && *ttl == 60)
            .times(1)
            .returning(|_, payload, _| {
                let message: PushMessage = serde_json::from_slice(&payload).unwrap();
                assert_eq!(message.data.notification.channel.to_string(), "tasks-7-5");
                assert!(message.data.notification.snapshot.is_some());
                Ok(DeliveryStatus::Delivered)
            });

        let dispatcher = PushDispatcher::new(store, Arc::new(transport), 60, None);
        let report = dispatcher.dispatch(task_event(7, 5)).await.unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                delivered: 1,
                failed: 0,
                expired: 0
            }
        );
    }

    #[tokio::test]
    async fn one_failing_endpoint_does_not_block_the_rest() {
        let store = Arc::new(MemoryStore::with(vec![
            (1, "https://push/down", Grant::unrestricted()),
            (2, "https://push/up", Grant::unrestricted()),
            (3, "https://push/gone", Grant::unrestricted()),
        ]));
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(3)
            .returning(|subscription, _, _| match subscription.endpoint.as_str() {
                "https://push/down" => Err(anyhow!("connection refused")),
                "https://push/gone" => Ok(DeliveryStatus::Expired),
                _ => Ok(DeliveryStatus::Delivered),
            });

        let dispatcher = PushDispatcher::new(store.clone(), Arc::new(transport), 60, None);
        let report = dispatcher.dispatch(task_event(1, 1)).await.unwrap();

        assert_eq!(
            report,
            DeliveryReport {
                delivered: 1,
                failed: 1,
                expired: 1
            }
        );
        assert_eq!(
            store.endpoints(),
            vec!["https://push/down".to_string(), "https://push/up".to_string()]
        );
    }

    #[tokio::test]
    async fn event_without_department_skips_department_scoped_subscribers() {
        let store = Arc::new(MemoryStore::with(vec![
            (1, "https://push/dept", Grant::new(Scope::Wildcard, Scope::ids([5]))),
            (2, "https://push/center", Grant::new(Scope::ids([3]), Scope::Wildcard)),
        ]));
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|subscription, _, _| subscription.endpoint == "https://push/center")
            .times(1)
            .returning(|_, _, _| Ok(DeliveryStatus::Delivered));

        let dispatcher = PushDispatcher::new(store, Arc::new(transport), 60, None);
        let mut event = task_event(3, 5);
        event.entity.department_id = None;
        let report = dispatcher.dispatch(event).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn reference_tables_publish_nothing() {
        let store = Arc::new(MemoryStore::with(vec![(
            1,
            "https://push/a",
            Grant::unrestricted(),
        )]));
        let mut transport = MockTransport::new();
        transport.expect_send().never();

        let dispatcher = PushDispatcher::new(store, Arc::new(transport), 60, None);
        let mut event = task_event(1, 1);
        event.entity.table = Table::Centers;
        let report = dispatcher.dispatch(event).await.unwrap();
        assert_eq!(report, DeliveryReport::default());
    }
}
