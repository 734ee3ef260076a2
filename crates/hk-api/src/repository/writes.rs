use super::{
    CounterRecordQuery, Repository, RepositoryError, RoomQuery, TaskQuery, Viewer,
};
use bytes::Bytes;
use hk_core::model::{CounterRecord, CounterRecordInput, Room, RoomStatusInput, Task, TaskInput};
use sqlx::{Postgres, Transaction};

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub content: Bytes,
}

fn ensure_admitted(
    viewer: &Viewer,
    center_id: Option<i64>,
    department_id: Option<i64>,
) -> Result<(), RepositoryError> {
    if viewer.grant.admits(center_id, department_id) {
        Ok(())
    } else {
        Err(RepositoryError::Forbidden(format!(
            "center {center_id:?} / department {department_id:?} is outside the grant"
        )))
    }
}

async fn insert_attachments(
    tx: &mut Transaction<'_, Postgres>,
    task_id: i64,
    attachments: &[NewAttachment],
) -> Result<(), RepositoryError> {
    for attachment in attachments {
        sqlx::query(
            "INSERT INTO hk.task_attachments \
             (task_id, file_name, content_type, size_bytes, content) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(task_id)
        .bind(&attachment.file_name)
        .bind(&attachment.content_type)
        .bind(attachment.content.len() as i64)
        .bind(attachment.content.as_ref())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

impl Repository {
    pub async fn create_task(
        &self,
        viewer: &Viewer,
        input: &TaskInput,
        attachments: &[NewAttachment],
    ) -> Result<Task, RepositoryError> {
        ensure_admitted(viewer, input.center_id, input.department_id)?;
        let target = input.target;

        let mut tx = self.pool().begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO hk.tasks \
             (title, description, status, priority, task_type_id, asset_id, location_id, \
              room_id, center_id, department_id, author_id, assignee_id, due_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING id",
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.status)
        .bind(input.priority)
        .bind(input.task_type_id)
        .bind(target.and_then(|t| t.asset_id()))
        .bind(target.and_then(|t| t.location_id()))
        .bind(target.and_then(|t| t.room_id()))
        .bind(input.center_id)
        .bind(input.department_id)
        .bind(viewer.user_id)
        .bind(input.assignee_id)
        .bind(input.due_at)
        .bind(input.completed_at)
        .fetch_one(&mut *tx)
        .await?;
        insert_attachments(&mut tx, id, attachments).await?;
        tx.commit().await?;

        tracing::info!(table = "tasks", remote_id = id, "task created");
        self.find_by_id(&TaskQuery, viewer, id)
            .await?
            .ok_or_else(|| RepositoryError::Integrity(format!("created task {id} is not visible")))
    }

    /// `Ok(None)` when the task no longer exists (or is no longer visible).
    pub async fn update_task(
        &self,
        viewer: &Viewer,
        id: i64,
        input: &TaskInput,
        attachments: &[NewAttachment],
    ) -> Result<Option<Task>, RepositoryError> {
        let Some(existing) = self.find_by_id(&TaskQuery, viewer, id).await? else {
            return Ok(None);
        };
        let is_author = existing
            .author
            .as_ref()
            .is_some_and(|author| author.id == viewer.user_id);
        if !is_author {
            ensure_admitted(viewer, input.center_id, input.department_id)?;
        }
        let target = input.target;

        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            "UPDATE hk.tasks SET title = $1, description = $2, status = $3, priority = $4, \
             task_type_id = $5, asset_id = $6, location_id = $7, room_id = $8, center_id = $9, \
             department_id = $10, assignee_id = $11, due_at = $12, completed_at = $13, \
             updated_at = NOW() \
             WHERE id = $14",
        )
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.status)
        .bind(input.priority)
        .bind(input.task_type_id)
        .bind(target.and_then(|t| t.asset_id()))
        .bind(target.and_then(|t| t.location_id()))
        .bind(target.and_then(|t| t.room_id()))
        .bind(input.center_id)
        .bind(input.department_id)
        .bind(input.assignee_id)
        .bind(input.due_at)
        .bind(input.completed_at)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }
        insert_attachments(&mut tx, id, attachments).await?;
        tx.commit().await?;

        tracing::info!(table = "tasks", remote_id = id, "task updated");
        self.find_by_id(&TaskQuery, viewer, id).await
    }

    /// Inserts when `id` is `None`; `Ok(None)` when the record to update is gone.
    pub async fn upsert_counter_record(
        &self,
        viewer: &Viewer,
        id: Option<i64>,
        input: &CounterRecordInput,
    ) -> Result<Option<CounterRecord>, RepositoryError> {
        ensure_admitted(viewer, input.center_id, input.department_id)?;

        let id = match id {
            None => {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO hk.counter_records \
                     (counter_id, value, recorded_at, employee_id, center_id, department_id) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                )
                .bind(input.counter_id)
                .bind(input.value)
                .bind(input.recorded_at)
                .bind(viewer.user_id)
                .bind(input.center_id)
                .bind(input.department_id)
                .fetch_one(self.pool())
                .await?
            }
            Some(id) => {
                if self
                    .find_by_id(&CounterRecordQuery, viewer, id)
                    .await?
                    .is_none()
                {
                    return Ok(None);
                }
                let updated = sqlx::query(
                    "UPDATE hk.counter_records SET counter_id = $1, value = $2, \
                     recorded_at = $3, center_id = $4, department_id = $5 WHERE id = $6",
                )
                .bind(input.counter_id)
                .bind(input.value)
                .bind(input.recorded_at)
                .bind(input.center_id)
                .bind(input.department_id)
                .bind(id)
                .execute(self.pool())
                .await?
                .rows_affected();
                if updated == 0 {
                    return Ok(None);
                }
                id
            }
        };

        tracing::info!(table = "counter-records", remote_id = id, "counter record written");
        self.find_by_id(&CounterRecordQuery, viewer, id).await
    }

    pub async fn set_room_status(
        &self,
        viewer: &Viewer,
        id: i64,
        input: &RoomStatusInput,
    ) -> Result<Option<Room>, RepositoryError> {
        if self.find_by_id(&RoomQuery, viewer, id).await?.is_none() {
            return Ok(None);
        }
        let updated = sqlx::query(
            "UPDATE hk.rooms SET status = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(&input.status)
        .bind(id)
        .execute(self.pool())
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }

        tracing::info!(table = "rooms", remote_id = id, status = %input.status, "room status set");
        self.find_by_id(&RoomQuery, viewer, id).await
    }
}
