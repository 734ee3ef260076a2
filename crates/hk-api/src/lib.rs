use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use hk_core::auth::JwtConfig;
use hk_core::http::HttpLimits;
use hk_core::{config, db, http, logging, metrics, server};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Pool, Postgres};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

mod auth;
mod entities;
pub mod push;
pub mod repository;

use push::{HttpPushTransport, PgSubscriptionStore, PushDispatcher, VapidSigner};
use repository::{Repository, RepositoryError};

pub(crate) const SERVICE_NAME: &str = "hk-api";

#[derive(Clone)]
pub(crate) struct AppState {
    pool: Pool<Postgres>,
    repository: Repository,
    jwt_config: JwtConfig,
    push: Arc<PushDispatcher>,
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub(crate) fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR", err.to_string())
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Forbidden(message) => {
                ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
            }
            RepositoryError::InvalidInput(message) => ApiError::bad_request(message),
            RepositoryError::Integrity(message) => {
                tracing::error!(error = %message, "repository integrity violation");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTEGRITY_ERROR", message)
            }
            RepositoryError::Database(err) => err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(payload)).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct HealthStatus {
    status: String,
}

pub struct ApiConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub jwt: JwtConfig,
    pub max_page_rows: i64,
    pub push_ttl_seconds: u64,
    pub push_icon: Option<String>,
    /// PKCS#8 PEM of the VAPID P-256 key. Unsigned pushes when absent.
    pub vapid_private_key: Option<String>,
    pub vapid_subject: String,
    pub http_limits: HttpLimits,
}

pub fn load_config() -> Result<ApiConfig> {
    let addr = config::socket_addr_from_env("HK_API_ADDR", "0.0.0.0:8080")?;
    let database_url = config::required_env("DATABASE_URL")?;
    let jwt = jwt_config_from_env()?;
    let max_page_rows = config::u64_from_env("HK_MAX_PAGE_ROWS", 500)?.max(1) as i64;
    let push_ttl_seconds = config::u64_from_env("HK_PUSH_TTL_SECONDS", 3600)?;
    let push_icon = std::env::var("HK_PUSH_ICON")
        .ok()
        .filter(|value| !value.trim().is_empty());
    let vapid_private_key = std::env::var("HK_VAPID_PRIVATE_KEY")
        .ok()
        .filter(|value| !value.trim().is_empty());
    let vapid_subject = config::env_or("HK_VAPID_SUBJECT", "mailto:ops@localhost");
    let defaults = HttpLimits::default();
    let http_limits = HttpLimits {
        max_body_bytes: config::u64_from_env(
            "HK_MAX_BODY_BYTES",
            defaults.max_body_bytes as u64,
        )? as usize,
        request_timeout: Duration::from_secs(config::u64_from_env(
            "HK_REQUEST_TIMEOUT_SECONDS",
            defaults.request_timeout.as_secs(),
        )?),
    };
    Ok(ApiConfig {
        addr,
        database_url,
        jwt,
        max_page_rows,
        push_ttl_seconds,
        push_icon,
        vapid_private_key,
        vapid_subject,
        http_limits,
    })
}

pub fn jwt_config_from_env() -> Result<JwtConfig> {
    Ok(JwtConfig {
        issuer: config::env_or("HK_JWT_ISSUER", "hk-api"),
        audience: config::env_or("HK_JWT_AUDIENCE", "hk-clients"),
        secret: config::required_env("HK_JWT_SECRET")?,
        ttl_seconds: config::u64_from_env("HK_JWT_TTL_SECONDS", 30 * 24 * 3600)?,
    })
}

pub async fn run(config: ApiConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);

    let pool = db::connect(&config.database_url).await?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let vapid = match &config.vapid_private_key {
        Some(pem) => {
            let signer = VapidSigner::from_pem(pem, config.vapid_subject.clone())?;
            tracing::info!(public_key = signer.public_key(), "vapid signing enabled");
            Some(signer)
        }
        None => {
            tracing::warn!("HK_VAPID_PRIVATE_KEY not set; push requests are unsigned");
            None
        }
    };
    let dispatcher = PushDispatcher::new(
        Arc::new(PgSubscriptionStore::new(pool.clone())),
        Arc::new(HttpPushTransport::new(client, vapid)),
        config.push_ttl_seconds,
        config.push_icon.clone(),
    );

    let state = AppState {
        repository: Repository::new(pool.clone(), config.max_page_rows),
        pool,
        jwt_config: config.jwt,
        push: Arc::new(dispatcher),
    };

    let router =
        http::apply_standard_layers(build_router(state), SERVICE_NAME, config.http_limits);
    server::serve(config.addr, router).await
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route(
            "/v1/:table",
            get(entities::list_rows).post(entities::create_row),
        )
        .route(
            "/v1/:table/:id",
            get(entities::get_row).put(entities::update_row),
        )
        .route("/v1/:table/:id/status", put(entities::update_status))
        .route(
            "/push/subscribe",
            post(push::subscribe).delete(push::unsubscribe),
        )
        .route("/push/debug", get(push::debug_subscriptions))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match db::check_ready(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthStatus { status: "ok".into() })),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthStatus {
                status: "unavailable".into(),
            }),
        ),
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    metrics::metrics_response(SERVICE_NAME)
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn entity_routes_require_bearer_token() {
        let response = test_support::router()
            .oneshot(
                Request::builder()
                    .uri("/v1/tasks?rows=10")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn debug_endpoint_rejects_garbage_token() {
        let response = test_support::router()
            .oneshot(
                Request::builder()
                    .uri("/push/debug")
                    .header("authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn repository_errors_map_to_statuses() {
        let forbidden: ApiError = RepositoryError::Forbidden("no".into()).into();
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        let invalid: ApiError = RepositoryError::InvalidInput("bad sort".into()).into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        let integrity: ApiError = RepositoryError::Integrity("2 rows".into()).into();
        assert_eq!(integrity.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(integrity.code, "INTEGRITY_ERROR");
    }
}
