use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;

use super::webpush::{self, SubscriptionKeys, VapidSigner};
use super::PushSubscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// The push service no longer knows the endpoint (404/410).
    Expired,
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: Bytes,
        ttl_seconds: u64,
    ) -> Result<DeliveryStatus>;
}

/// Delivers encrypted messages to the subscription's push service.
pub struct HttpPushTransport {
    client: reqwest::Client,
    vapid: Option<VapidSigner>,
}

impl HttpPushTransport {
    pub fn new(client: reqwest::Client, vapid: Option<VapidSigner>) -> Self {
        Self { client, vapid }
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: Bytes,
        ttl_seconds: u64,
    ) -> Result<DeliveryStatus> {
        let keys = SubscriptionKeys::from_value(&subscription.keys)?;
        let body = webpush::encrypt(&payload, &keys)?;

        let mut request = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", ttl_seconds.to_string())
            .header(CONTENT_ENCODING, "aes128gcm")
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body);
        if let Some(vapid) = &self.vapid {
            request = request.header(
                AUTHORIZATION,
                vapid.authorization(&subscription.endpoint, Utc::now())?,
            );
        }
        let response = request.send().await?;

        match response.status() {
            status if status.is_success() => Ok(DeliveryStatus::Delivered),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(DeliveryStatus::Expired),
            status => Err(anyhow!("push service answered {status}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::webpush::test_support::{decrypt, subscriber};
    use axum::body::Bytes as AxumBytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;
    use axum::Router;
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use p256::SecretKey;
    use rand::rngs::OsRng;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Received(Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>);

    async fn record(
        State(received): State<Received>,
        headers: HeaderMap,
        body: AxumBytes,
    ) -> AxumStatus {
        received.0.lock().unwrap().push((headers, body.to_vec()));
        AxumStatus::CREATED
    }

    async fn spawn_push_service(received: Received) -> String {
        let app = Router::new()
            .route("/ok", post(record))
            .route("/gone", post(|| async { AxumStatus::GONE }))
            .route("/broken", post(|| async { AxumStatus::BAD_GATEWAY }))
            .with_state(received);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn subscription(endpoint: String, keys: Value) -> PushSubscription {
        PushSubscription {
            id: 1,
            user_id: 1,
            endpoint,
            keys,
            channels: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn signer() -> VapidSigner {
        let pem = SecretKey::random(&mut OsRng)
            .to_pkcs8_pem(LineEnding::LF)
            .unwrap();
        VapidSigner::from_pem(&pem, "mailto:ops@example.com").unwrap()
    }

    #[tokio::test]
    async fn message_is_encrypted_and_signed_for_the_push_service() {
        let received = Received::default();
        let base = spawn_push_service(received.clone()).await;
        let signer = signer();
        let public_key = signer.public_key().to_string();
        let transport = HttpPushTransport::new(reqwest::Client::new(), Some(signer));
        let (secret, auth, keys) = subscriber();
        let payload = Bytes::from_static(br#"{"title":"Room 101"}"#);

        let status = transport
            .send(&subscription(format!("{base}/ok"), keys), payload.clone(), 60)
            .await
            .expect("send");
        assert_eq!(status, DeliveryStatus::Delivered);

        let (headers, body) = received.0.lock().unwrap().pop().unwrap();
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
        assert_eq!(header("ttl"), "60");
        assert_eq!(header("content-encoding"), "aes128gcm");
        assert!(header("authorization").starts_with("vapid t="));
        assert!(header("authorization").ends_with(&format!(", k={public_key}")));
        assert_eq!(decrypt(&body, &secret, &auth).unwrap(), payload.to_vec());
    }

    #[tokio::test]
    async fn status_codes_map_to_delivery_outcomes() {
        let base = spawn_push_service(Received::default()).await;
        let transport = HttpPushTransport::new(reqwest::Client::new(), None);
        let (_, _, keys) = subscriber();
        let payload = Bytes::from_static(b"{}");

        let gone = transport
            .send(&subscription(format!("{base}/gone"), keys.clone()), payload.clone(), 60)
            .await
            .expect("gone");
        assert_eq!(gone, DeliveryStatus::Expired);

        assert!(transport
            .send(&subscription(format!("{base}/broken"), keys), payload.clone(), 60)
            .await
            .is_err());

        assert!(transport
            .send(&subscription(format!("{base}/ok"), serde_json::json!({})), payload, 60)
            .await
            .is_err());
    }
}
