//! Notification Channel Router, push-subscription registry and delivery.

mod dispatcher;
mod router;
mod store;
mod transport;
mod webpush;

pub use dispatcher::{DeliveryReport, PushDispatcher};
pub use router::{DomainEvent, NotificationRouter, UNGOVERNED_ID};
pub use store::{PgSubscriptionStore, PushSubscription, SubscriptionStore};
pub use transport::{DeliveryStatus, HttpPushTransport, PushTransport};
pub use webpush::{SubscriptionKeys, VapidSigner};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use hk_core::channel::ChannelPattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::auth::{require_auth, require_unrestricted};
use crate::{ApiError, ApiResult, AppState};

/// The browser/device subscription object as handed out by the push service.
#[derive(Debug, Deserialize)]
pub struct TransportSubscription {
    pub endpoint: String,
    #[serde(default)]
    pub keys: Value,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub subscription: TransportSubscription,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub endpoint: String,
    pub channels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

fn store_error(err: anyhow::Error) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR", err.to_string())
}

fn validate_endpoint(endpoint: &str) -> ApiResult<()> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|err| ApiError::bad_request(format!("invalid endpoint: {err}")))?;
    match url.scheme() {
        "https" | "http" => Ok(()),
        scheme => Err(ApiError::bad_request(format!(
            "unsupported endpoint scheme: {scheme}"
        ))),
    }
}

fn validate_subscription(subscription: &TransportSubscription) -> ApiResult<()> {
    validate_endpoint(&subscription.endpoint)?;
    SubscriptionKeys::from_value(&subscription.keys)
        .map_err(|err| ApiError::bad_request(format!("invalid subscription keys: {err:#}")))?;
    Ok(())
}

pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SubscribeRequest>,
) -> ApiResult<Response> {
    let viewer = require_auth(&state, &headers).await?;
    let subscription = payload.subscription;
    validate_subscription(&subscription)?;

    let channels: Vec<String> = ChannelPattern::all_for_grant(&viewer.grant)
        .iter()
        .map(ToString::to_string)
        .collect();
    let stored = state
        .push
        .store()
        .upsert(
            viewer.user_id,
            &subscription.endpoint,
            &subscription.keys,
            &channels,
        )
        .await
        .map_err(store_error)?;

    tracing::info!(
        user_id = viewer.user_id,
        endpoint = %stored.endpoint,
        channels = ?stored.channels,
        "push subscription registered"
    );
    Ok((StatusCode::CREATED, Json(stored)).into_response())
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<UnsubscribeRequest>,
) -> ApiResult<StatusCode> {
    let viewer = require_auth(&state, &headers).await?;
    let removed = state
        .push
        .store()
        .remove(viewer.user_id, &payload.endpoint)
        .await
        .map_err(store_error)?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "subscription not found",
        ))
    }
}

/// Per user: active subscriptions and their channel memberships.
pub async fn debug_subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<BTreeMap<i64, Vec<SubscriptionView>>>> {
    let viewer = require_auth(&state, &headers).await?;
    require_unrestricted(&viewer)?;

    let subscriptions = state
        .push
        .store()
        .list_with_grants()
        .await
        .map_err(store_error)?;
    let mut by_user: BTreeMap<i64, Vec<SubscriptionView>> = BTreeMap::new();
    for (subscription, grant) in subscriptions {
        by_user
            .entry(subscription.user_id)
            .or_default()
            .push(SubscriptionView {
                endpoint: subscription.endpoint,
                channels: ChannelPattern::all_for_grant(&grant)
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                created_at: subscription.created_at,
            });
    }
    Ok(Json(by_user))
}
