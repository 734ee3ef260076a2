use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CenterRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRef {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub id: i64,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRef {
    pub id: i64,
    pub name: String,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTypeRef {
    pub id: i64,
    pub name: String,
}

/// What a task is about. Exactly one of the underlying foreign keys is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskTarget {
    Asset(AssetRef),
    Location(LocationRef),
    Room(RoomRef),
}

impl TaskTarget {
    /// Picks the first populated reference; asset wins over location over room.
    pub fn resolve(
        asset: Option<AssetRef>,
        location: Option<LocationRef>,
        room: Option<RoomRef>,
    ) -> Option<Self> {
        asset
            .map(TaskTarget::Asset)
            .or_else(|| location.map(TaskTarget::Location))
            .or_else(|| room.map(TaskTarget::Room))
    }

    pub fn room_id(&self) -> Option<i64> {
        match self {
            TaskTarget::Room(room) => Some(room.id),
            _ => None,
        }
    }
}
