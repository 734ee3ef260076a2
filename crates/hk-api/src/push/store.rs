use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hk_core::grant::{Grant, Scope};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub id: i64,
    pub user_id: i64,
    pub endpoint: String,
    pub keys: Value,
    pub channels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// One row per endpoint; re-registering moves the endpoint to `user_id`.
    async fn upsert(
        &self,
        user_id: i64,
        endpoint: &str,
        keys: &Value,
        channels: &[String],
    ) -> Result<PushSubscription>;

    async fn remove(&self, user_id: i64, endpoint: &str) -> Result<bool>;

    /// Drops an endpoint the push service reported as gone.
    async fn remove_endpoint(&self, endpoint: &str) -> Result<()>;

    /// Every subscription together with its owner's current grant.
    async fn list_with_grants(&self) -> Result<Vec<(PushSubscription, Grant)>>;
}

pub struct PgSubscriptionStore {
    pool: Pool<Postgres>,
}

impl PgSubscriptionStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn map_subscription(row: &PgRow) -> Result<PushSubscription, sqlx::Error> {
    Ok(PushSubscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        endpoint: row.try_get("endpoint")?,
        keys: row.try_get("keys")?,
        channels: row.try_get("channels")?,
        created_at: row.try_get("created_at")?,
    })
}

fn grant_from_columns(
    center_ids: Option<String>,
    department_ids: Option<String>,
) -> Option<Grant> {
    let center_ids = match center_ids {
        Some(raw) => raw.parse::<Scope>().ok()?,
        None => Scope::ids([]),
    };
    let department_ids = match department_ids {
        Some(raw) => raw.parse::<Scope>().ok()?,
        None => Scope::ids([]),
    };
    Some(Grant::new(center_ids, department_ids))
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn upsert(
        &self,
        user_id: i64,
        endpoint: &str,
        keys: &Value,
        channels: &[String],
    ) -> Result<PushSubscription> {
        let row = sqlx::query(
            "INSERT INTO hk.push_subscriptions (user_id, endpoint, keys, channels) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (endpoint) DO UPDATE SET user_id = EXCLUDED.user_id, \
             keys = EXCLUDED.keys, channels = EXCLUDED.channels, created_at = NOW() \
             RETURNING id, user_id, endpoint, keys, channels, created_at",
        )
        .bind(user_id)
        .bind(endpoint)
        .bind(keys)
        .bind(channels)
        .fetch_one(&self.pool)
        .await?;
        Ok(map_subscription(&row)?)
    }

    async fn remove(&self, user_id: i64, endpoint: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM hk.push_subscriptions WHERE user_id = $1 AND endpoint = $2")
                .bind(user_id)
                .bind(endpoint)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_endpoint(&self, endpoint: &str) -> Result<()> {
        sqlx::query("DELETE FROM hk.push_subscriptions WHERE endpoint = $1")
            .bind(endpoint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_with_grants(&self) -> Result<Vec<(PushSubscription, Grant)>> {
        let rows = sqlx::query(
            "SELECT s.id, s.user_id, s.endpoint, s.keys, s.channels, s.created_at, \
             g.center_ids, g.department_ids \
             FROM hk.push_subscriptions s \
             LEFT JOIN hk.user_grants g ON g.user_id = s.user_id \
             ORDER BY s.user_id, s.id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            let subscription = map_subscription(&row)?;
            let grant =
                grant_from_columns(row.try_get("center_ids")?, row.try_get("department_ids")?);
            match grant {
                Some(grant) => subscriptions.push((subscription, grant)),
                None => tracing::warn!(
                    user_id = subscription.user_id,
                    "skipping subscription with unparsable grant"
                ),
            }
        }
        Ok(subscriptions)
    }
}
