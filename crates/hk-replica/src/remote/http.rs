use super::{Connectivity, PushOutcome, RemoteApi};
use crate::error::AppError;
use crate::store::PendingAttachment;
use async_trait::async_trait;
use hk_core::model::{CounterRecordInput, RoomStatusInput, Table, TaskInput, ATTACHMENT_FIELD};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    connectivity: Arc<dyn Connectivity>,
}

impl HttpRemoteApi {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            connectivity,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, AppError> {
        match builder.send().await {
            Ok(response) => Ok(response),
            Err(err) => {
                let online = self.connectivity.is_online().await;
                tracing::warn!(error = %err, online, "request did not reach the server");
                Err(AppError::transport(online))
            }
        }
    }

    async fn write(&self, builder: RequestBuilder) -> Result<PushOutcome, AppError> {
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(PushOutcome::Gone);
        }
        let response = ensure_success(response).await?;
        Ok(PushOutcome::Updated(read_json(response).await?))
    }
}

async fn ensure_success(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Unauthorized(message),
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        _ => AppError::Http {
            status: status.as_u16(),
            message,
        },
    })
}

async fn read_json(response: Response) -> Result<Value, AppError> {
    response
        .json::<Value>()
        .await
        .map_err(|e| AppError::Serialization(e.to_string()))
}

fn text_form(fields: Vec<(&'static str, String)>) -> Form {
    fields
        .into_iter()
        .fold(Form::new(), |form, (name, value)| form.text(name, value))
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn fetch_page(
        &self,
        table: Table,
        cursor: Option<i64>,
        rows: u32,
    ) -> Result<Vec<Value>, AppError> {
        let mut query = vec![("rows", rows.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let builder = self
            .request(Method::GET, &format!("/v1/{}", table.as_str()))
            .query(&query);
        let response = ensure_success(self.send(builder).await?).await?;

        match read_json(response).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(AppError::Serialization(format!(
                "expected an array of {table} rows, got {other}"
            ))),
        }
    }

    async fn fetch_one(&self, table: Table, id: i64) -> Result<Option<Value>, AppError> {
        let builder = self.request(Method::GET, &format!("/v1/{}/{id}", table.as_str()));
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        Ok(Some(read_json(response).await?))
    }

    async fn push_task(
        &self,
        remote_id: Option<i64>,
        input: &TaskInput,
        attachments: &[PendingAttachment],
    ) -> Result<PushOutcome, AppError> {
        let mut form = text_form(input.to_fields());
        for attachment in attachments {
            let part = Part::bytes(attachment.content.to_vec())
                .file_name(attachment.file_name.clone())
                .mime_str(&attachment.content_type)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            form = form.part(ATTACHMENT_FIELD, part);
        }

        let builder = match remote_id {
            Some(id) => self.request(Method::PUT, &format!("/v1/tasks/{id}")),
            None => self.request(Method::POST, "/v1/tasks"),
        };
        self.write(builder.multipart(form)).await
    }

    async fn push_counter_record(
        &self,
        remote_id: Option<i64>,
        input: &CounterRecordInput,
    ) -> Result<PushOutcome, AppError> {
        let builder = match remote_id {
            Some(id) => self.request(Method::PUT, &format!("/v1/counter-records/{id}")),
            None => self.request(Method::POST, "/v1/counter-records"),
        };
        self.write(builder.multipart(text_form(input.to_fields())))
            .await
    }

    async fn push_room_status(
        &self,
        room_id: i64,
        input: &RoomStatusInput,
    ) -> Result<PushOutcome, AppError> {
        let builder = self.request(Method::PUT, &format!("/v1/rooms/{room_id}/status"));
        self.write(builder.multipart(text_form(input.to_fields())))
            .await
    }

    async fn subscribe_push(&self, subscription: &Value) -> Result<(), AppError> {
        let builder = self
            .request(Method::POST, "/push/subscribe")
            .json(&json!({ "subscription": subscription }));
        ensure_success(self.send(builder).await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ManualConnectivity;
    use axum::extract::{Multipart, Path, Query};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    async fn spawn(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn api(addr: SocketAddr, online: bool) -> HttpRemoteApi {
        HttpRemoteApi::new(
            &format!("http://{addr}/"),
            Some("token-1".into()),
            Arc::new(ManualConnectivity::new(online)),
        )
        .unwrap()
    }

    async fn field_names(mut multipart: Multipart) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            names.push(field.name().unwrap_or_default().to_string());
        }
        names
    }

    #[tokio::test]
    async fn task_create_posts_multipart_with_attachments() {
        let router = Router::new().route(
            "/v1/tasks",
            post(|headers: HeaderMap, multipart: Multipart| async move {
                assert_eq!(headers["authorization"], "Bearer token-1");
                let names = field_names(multipart).await;
                Json(json!({ "id": 42, "fields": names }))
            }),
        );
        let addr = spawn(router).await;

        let input = TaskInput {
            title: "Fix tap".into(),
            status: "open".into(),
            ..TaskInput::default()
        };
        let attachment = PendingAttachment {
            file_name: "tap.jpg".into(),
            content_type: "image/jpeg".into(),
            content: Bytes::from_static(b"jpeg"),
        };
        let outcome = api(addr, true)
            .push_task(None, &input, &[attachment])
            .await
            .unwrap();

        let PushOutcome::Updated(row) = outcome else {
            panic!("expected a row");
        };
        assert_eq!(row["id"], 42);
        assert_eq!(row["fields"], json!(["title", "status", "attachment"]));
    }

    #[tokio::test]
    async fn no_content_means_gone() {
        let router = Router::new().route(
            "/v1/tasks/:id",
            put(|| async { AxumStatus::NO_CONTENT }),
        );
        let addr = spawn(router).await;

        let outcome = api(addr, true)
            .push_task(Some(8), &TaskInput::default(), &[])
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Gone);
    }

    #[tokio::test]
    async fn error_bodies_are_unwrapped() {
        let router = Router::new().route(
            "/v1/rooms/:id/status",
            put(|| async {
                (
                    AxumStatus::INTERNAL_SERVER_ERROR,
                    Json(json!({ "code": "DB_ERROR", "message": "database unavailable" })),
                )
            }),
        );
        let addr = spawn(router).await;

        let err = api(addr, true)
            .push_room_status(
                3,
                &RoomStatusInput {
                    status: "clean".into(),
                },
            )
            .await
            .unwrap_err();
        match err {
            AppError::Http { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "database unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pages_carry_cursor_and_size() {
        let router = Router::new()
            .route(
                "/v1/:table",
                get(
                    |Path(table): Path<String>, Query(query): Query<HashMap<String, String>>| async move {
                        Json(json!([{ "id": 1, "table": table, "cursor": query.get("cursor"), "rows": query.get("rows") }]))
                    },
                ),
            )
            .route(
                "/v1/:table/:id",
                get(|| async { AxumStatus::NOT_FOUND }),
            );
        let addr = spawn(router).await;
        let api = api(addr, true);

        let page = api
            .fetch_page(Table::CounterRecords, Some(17), 50)
            .await
            .unwrap();
        assert_eq!(page[0]["table"], "counter-records");
        assert_eq!(page[0]["cursor"], "17");
        assert_eq!(page[0]["rows"], "50");

        assert_eq!(api.fetch_one(Table::Rooms, 4).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = api(addr, false)
            .fetch_page(Table::Centers, None, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Transport { online: false, .. }));
    }
}
