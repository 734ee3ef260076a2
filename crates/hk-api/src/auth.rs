use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use hk_core::auth;
use hk_core::grant::{Grant, Scope};
use sqlx::{Pool, Postgres, Row};

use crate::repository::Viewer;
use crate::{ApiError, ApiResult, AppState};

const AUTHENTICATE_BEARER_CHALLENGE: &str = r#"Bearer realm="hk-api""#;

pub(crate) async fn require_auth(state: &AppState, headers: &HeaderMap) -> ApiResult<Viewer> {
    let user_id = authenticate(state, headers)?;
    let grant = load_grant(&state.pool, user_id).await?;
    Ok(Viewer { user_id, grant })
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<i64> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| auth_required_error("missing token"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| auth_required_error("invalid token"))?;
    let claims = auth::verify_token(token, &state.jwt_config)
        .map_err(|err| auth_required_error(err.to_string()))?;
    claims
        .user_id()
        .map_err(|err| auth_required_error(err.to_string()))
}

pub(crate) fn require_unrestricted(viewer: &Viewer) -> ApiResult<()> {
    if viewer.grant.is_unrestricted() {
        Ok(())
    } else {
        Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "unrestricted grant required",
        ))
    }
}

fn auth_required_error(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", message)
        .with_details(serde_json::json!({ "challenge": AUTHENTICATE_BEARER_CHALLENGE }))
}

/// Users without a grant row see only ungoverned rows.
pub(crate) async fn load_grant(pool: &Pool<Postgres>, user_id: i64) -> ApiResult<Grant> {
    let row = sqlx::query(
        "SELECT center_ids, department_ids FROM hk.user_grants WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(Grant::new(Scope::ids([]), Scope::ids([])));
    };

    let center_ids: String = row.try_get("center_ids")?;
    let department_ids: String = row.try_get("department_ids")?;
    parse_grant(&center_ids, &department_ids)
}

fn parse_grant(center_ids: &str, department_ids: &str) -> ApiResult<Grant> {
    let invalid = |err: hk_core::grant::ScopeParseError| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "GRANT_INVALID",
            err.to_string(),
        )
    };
    Ok(Grant::new(
        center_ids.parse().map_err(invalid)?,
        department_ids.parse().map_err(invalid)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{HttpPushTransport, PgSubscriptionStore};
    use crate::test_support;
    use axum::http::HeaderValue;
    use std::sync::Arc;

    fn state() -> AppState {
        test_support::test_state(
            Arc::new(PgSubscriptionStore::new(test_support::lazy_pool())),
            Arc::new(HttpPushTransport::new(reqwest::Client::new(), None)),
        )
    }

    #[tokio::test]
    async fn bearer_token_resolves_user_id() {
        let state = state();
        let (token, _) = auth::issue_token(42, &state.jwt_config).expect("token");
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );

        assert_eq!(authenticate(&state, &headers).expect("auth"), 42);
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_rejected() {
        let state = state();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));

        let err = authenticate(&state, &headers).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn grant_text_columns_parse() {
        let grant = parse_grant("*", "5").expect("grant");
        assert!(grant.center_ids.is_wildcard());
        assert_eq!(grant.department_ids, Scope::ids([5]));
        assert!(parse_grant("1;2", "*").is_err());
    }

    #[test]
    fn restricted_viewer_cannot_use_admin_paths() {
        let viewer = Viewer {
            user_id: 1,
            grant: Grant::new(Scope::Wildcard, Scope::ids([5])),
        };
        assert!(require_unrestricted(&viewer).is_err());
        let admin = Viewer {
            user_id: 2,
            grant: Grant::unrestricted(),
        };
        assert!(require_unrestricted(&admin).is_ok());
    }
}
