//! Replicated entity model shared by the API and the replica.

mod entities;
mod forms;
mod refs;

pub use entities::*;
pub use forms::*;
pub use refs::*;

use crate::channel::Topic;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Table {
    Centers,
    Rooms,
    Departments,
    Employees,
    Assets,
    Counters,
    CounterRecords,
    Tasks,
    TaskTypes,
    TaskEnums,
    WorkTimes,
    Reservations,
}

/// How a full pull reconciles a table into the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStrategy {
    Replace,
    UpsertById,
}

impl Table {
    pub const ALL: [Table; 12] = [
        Table::Centers,
        Table::Departments,
        Table::Employees,
        Table::Rooms,
        Table::Assets,
        Table::Counters,
        Table::CounterRecords,
        Table::TaskTypes,
        Table::TaskEnums,
        Table::Tasks,
        Table::WorkTimes,
        Table::Reservations,
    ];

    pub fn all() -> &'static [Table] {
        &Self::ALL
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Centers => "centers",
            Table::Rooms => "rooms",
            Table::Departments => "departments",
            Table::Employees => "employees",
            Table::Assets => "assets",
            Table::Counters => "counters",
            Table::CounterRecords => "counter-records",
            Table::Tasks => "tasks",
            Table::TaskTypes => "task-types",
            Table::TaskEnums => "task-enums",
            Table::WorkTimes => "work-times",
            Table::Reservations => "reservations",
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Table::Tasks | Table::CounterRecords | Table::Rooms)
    }

    pub fn pull_strategy(&self) -> PullStrategy {
        if self.is_writable() {
            PullStrategy::UpsertById
        } else {
            PullStrategy::Replace
        }
    }

    pub fn topic(&self) -> Option<Topic> {
        match self {
            Table::Tasks => Some(Topic::Tasks),
            Table::CounterRecords => Some(Topic::CounterRecords),
            Table::Rooms => Some(Topic::Rooms),
            _ => None,
        }
    }
}

impl From<Topic> for Table {
    fn from(topic: Topic) -> Self {
        match topic {
            Topic::Tasks => Table::Tasks,
            Topic::CounterRecords => Table::CounterRecords,
            Topic::Rooms => Table::Rooms,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown table: {0}")]
pub struct UnknownTable(pub String);

impl FromStr for Table {
    type Err = UnknownTable;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|table| table.as_str() == value)
            .ok_or_else(|| UnknownTable(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
    New,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::New => "new",
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            "new" => Ok(SyncStatus::New),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// An entity stored in one of the replicated tables.
pub trait Replicated: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;

    /// Remote identity; `None` until the first successful write.
    fn remote_id(&self) -> Option<i64>;

    /// Values of the (center, department) security columns.
    fn security(&self) -> (Option<i64>, Option<i64>);
}
