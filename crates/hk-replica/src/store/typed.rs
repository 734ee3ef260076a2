use super::{ReplicaRow, ReplicaStore};
use crate::error::AppError;
use hk_core::model::{Replicated, SyncStatus};

/// A decoded entity together with its local identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub local_id: i64,
    pub sync_status: SyncStatus,
    pub entity: T,
}

impl<T: Replicated> Stored<T> {
    fn from_row(row: &ReplicaRow) -> Result<Self, AppError> {
        Ok(Self {
            local_id: row.local_id,
            sync_status: row.sync_status,
            entity: row.decode()?,
        })
    }
}

/// Records an entity created on the device; it is pushed on the next sync.
pub async fn create_local<T: Replicated>(
    store: &dyn ReplicaStore,
    entity: &T,
) -> Result<Stored<T>, AppError> {
    let data = serde_json::to_value(entity)?;
    let row = store.insert_local(T::TABLE, &data, SyncStatus::New).await?;
    Stored::from_row(&row)
}

/// Saves a local edit. Rows that never reached the server stay `new`.
pub async fn save_local_edit<T: Replicated>(
    store: &dyn ReplicaStore,
    local_id: i64,
    entity: &T,
) -> Result<(), AppError> {
    let row = store
        .get(local_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("replica row {local_id}")))?;
    let status = if row.remote_id.is_some() {
        SyncStatus::Pending
    } else {
        SyncStatus::New
    };
    store
        .update_row(local_id, &serde_json::to_value(entity)?, status)
        .await
}

pub async fn list_entities<T: Replicated>(
    store: &dyn ReplicaStore,
) -> Result<Vec<Stored<T>>, AppError> {
    store
        .list(T::TABLE)
        .await?
        .iter()
        .map(Stored::from_row)
        .collect()
}

pub async fn find_entity<T: Replicated>(
    store: &dyn ReplicaStore,
    remote_id: i64,
) -> Result<Option<Stored<T>>, AppError> {
    store
        .find_by_remote_id(T::TABLE, remote_id)
        .await?
        .as_ref()
        .map(Stored::from_row)
        .transpose()
}
