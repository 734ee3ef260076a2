use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hk_core::model::{
    CounterRecordInput, FormFields, Replicated, RoomStatusInput, Table, TaskInput,
    ATTACHMENT_FIELD,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::require_auth;
use crate::push::DomainEvent;
use crate::repository::*;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub cursor: Option<i64>,
    pub rows: Option<i64>,
    pub sort: Option<String>,
    /// Employees only: exact username lookup (unrestricted grants).
    pub username: Option<String>,
}

/// Runs `$body` with `$def` bound to the query definition of `$table`.
macro_rules! with_definition {
    ($table:expr, $def:ident => $body:expr) => {
        match $table {
            Table::Centers => { let $def = &CenterQuery; $body }
            Table::Departments => { let $def = &DepartmentQuery; $body }
            Table::Employees => { let $def = &EmployeeQuery; $body }
            Table::Rooms => { let $def = &RoomQuery; $body }
            Table::Assets => { let $def = &AssetQuery; $body }
            Table::Counters => { let $def = &CounterQuery; $body }
            Table::CounterRecords => { let $def = &CounterRecordQuery; $body }
            Table::Tasks => { let $def = &TaskQuery; $body }
            Table::TaskTypes => { let $def = &TaskTypeQuery; $body }
            Table::TaskEnums => { let $def = &TaskEnumQuery; $body }
            Table::WorkTimes => { let $def = &WorkTimeQuery; $body }
            Table::Reservations => { let $def = &ReservationQuery; $body }
        }
    };
}

fn parse_table(raw: &str) -> ApiResult<Table> {
    raw.parse::<Table>()
        .map_err(|err| ApiError::new(StatusCode::NOT_FOUND, "UNKNOWN_TABLE", err.to_string()))
}

fn encode<T: Serialize>(value: &T) -> ApiResult<Json<Value>> {
    serde_json::to_value(value).map(Json).map_err(|err| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ENCODE_ERROR",
            err.to_string(),
        )
    })
}

fn not_writable(table: Table) -> ApiError {
    ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        "NOT_WRITABLE",
        format!("{table} does not accept this write"),
    )
}

async fn list_with<D: QueryDefinition>(
    state: &AppState,
    definition: &D,
    viewer: &Viewer,
    query: &ListQuery,
) -> ApiResult<Json<Value>> {
    let page = state
        .repository
        .page_request::<D>(query.cursor, query.rows, query.sort.as_deref())?;
    let rows = state.repository.find_all(definition, viewer, &page).await?;
    encode(&rows)
}

async fn get_with<D: QueryDefinition>(
    state: &AppState,
    definition: &D,
    viewer: &Viewer,
    id: i64,
) -> ApiResult<Json<Value>> {
    match state.repository.find_by_id(definition, viewer, id).await? {
        Some(row) => encode(&row),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{} {id} not found", <D::Entity as Replicated>::TABLE),
        )),
    }
}

pub async fn list_rows(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(table): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let viewer = require_auth(&state, &headers).await?;
    let table = parse_table(&table)?;

    if let Some(username) = query.username.as_deref() {
        if table != Table::Employees {
            return Err(ApiError::bad_request("username lookup is only for employees"));
        }
        let found = state
            .repository
            .find_employee_by_username(&viewer, username)
            .await?;
        return encode(&found.into_iter().collect::<Vec<_>>());
    }

    with_definition!(table, def => list_with(&state, def, &viewer, &query).await)
}

pub async fn get_row(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((table, id)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    let viewer = require_auth(&state, &headers).await?;
    let table = parse_table(&table)?;
    with_definition!(table, def => get_with(&state, def, &viewer, id).await)
}

struct WriteForm {
    fields: FormFields,
    attachments: Vec<NewAttachment>,
}

async fn read_form(mut multipart: Multipart) -> ApiResult<WriteForm> {
    let mut fields = FormFields::new();
    let mut attachments = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == ATTACHMENT_FIELD {
            let file_name = field.file_name().unwrap_or(ATTACHMENT_FIELD).to_string();
            let content_type = field.content_type().map(str::to_string);
            let content = field
                .bytes()
                .await
                .map_err(|err| ApiError::bad_request(err.to_string()))?;
            attachments.push(NewAttachment {
                file_name,
                content_type,
                content,
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|err| ApiError::bad_request(err.to_string()))?;
            fields.insert(name, value);
        }
    }

    Ok(WriteForm {
        fields,
        attachments,
    })
}

fn form_error(err: hk_core::model::FormError) -> ApiError {
    ApiError::bad_request(err.to_string())
}

/// 204 when the target row is gone; otherwise publishes the change and
/// returns the re-read row.
fn written<T: Serialize>(
    state: &AppState,
    row: Option<T>,
    event: impl FnOnce(&T) -> Option<DomainEvent>,
) -> ApiResult<Response> {
    let Some(row) = row else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    if let Some(event) = event(&row) {
        state.push.publish(event);
    }
    Ok(encode(&row)?.into_response())
}

pub async fn create_row(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(table): Path<String>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let viewer = require_auth(&state, &headers).await?;
    let table = parse_table(&table)?;
    let form = read_form(multipart).await?;

    match table {
        Table::Tasks => {
            let input = TaskInput::from_fields(&form.fields).map_err(form_error)?;
            let task = state
                .repository
                .create_task(&viewer, &input, &form.attachments)
                .await?;
            written(&state, Some(task), |task| DomainEvent::task(task, true))
        }
        Table::CounterRecords => {
            let input = CounterRecordInput::from_fields(&form.fields).map_err(form_error)?;
            let record = state
                .repository
                .upsert_counter_record(&viewer, None, &input)
                .await?;
            written(&state, record, DomainEvent::counter_record)
        }
        other => Err(not_writable(other)),
    }
}

pub async fn update_row(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((table, id)): Path<(String, i64)>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let viewer = require_auth(&state, &headers).await?;
    let table = parse_table(&table)?;
    let form = read_form(multipart).await?;

    match table {
        Table::Tasks => {
            let input = TaskInput::from_fields(&form.fields).map_err(form_error)?;
            let task = state
                .repository
                .update_task(&viewer, id, &input, &form.attachments)
                .await?;
            written(&state, task, |task| DomainEvent::task(task, false))
        }
        Table::CounterRecords => {
            let input = CounterRecordInput::from_fields(&form.fields).map_err(form_error)?;
            let record = state
                .repository
                .upsert_counter_record(&viewer, Some(id), &input)
                .await?;
            written(&state, record, DomainEvent::counter_record)
        }
        other => Err(not_writable(other)),
    }
}

pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((table, id)): Path<(String, i64)>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let viewer = require_auth(&state, &headers).await?;
    let table = parse_table(&table)?;
    if table != Table::Rooms {
        return Err(not_writable(table));
    }
    let form = read_form(multipart).await?;
    let input = RoomStatusInput::from_fields(&form.fields).map_err(form_error)?;
    let room = state.repository.set_room_status(&viewer, id, &input).await?;
    written(&state, room, DomainEvent::room)
}
