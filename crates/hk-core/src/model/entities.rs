use super::refs::*;
use super::{Replicated, Table};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

fn ref_id<T, F: Fn(&T) -> i64>(value: &Option<T>, id: F) -> Option<i64> {
    value.as_ref().map(id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Center {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub timezone: Option<String>,
}

impl Replicated for Center {
    const TABLE: Table = Table::Centers;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (Some(self.id), None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: i64,
    pub name: String,
}

impl Replicated for Department {
    const TABLE: Table = Table::Departments;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (None, Some(self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub center: Option<CenterRef>,
    pub department: Option<DepartmentRef>,
}

impl Replicated for Employee {
    const TABLE: Table = Table::Employees;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (
            ref_id(&self.center, |c| c.id),
            ref_id(&self.department, |d| d.id),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: i64,
    pub number: String,
    pub floor: Option<i32>,
    pub room_type: Option<String>,
    pub status: String,
    pub center: CenterRef,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Replicated for Room {
    const TABLE: Table = Table::Rooms;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (Some(self.center.id), None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub center: Option<CenterRef>,
    pub department: Option<DepartmentRef>,
    pub location: Option<LocationRef>,
    pub room: Option<RoomRef>,
}

impl Replicated for Asset {
    const TABLE: Table = Table::Assets;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (
            ref_id(&self.center, |c| c.id),
            ref_id(&self.department, |d| d.id),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub id: i64,
    pub name: String,
    pub unit: Option<String>,
    pub asset: Option<AssetRef>,
    pub center: Option<CenterRef>,
    pub department: Option<DepartmentRef>,
}

impl Replicated for Counter {
    const TABLE: Table = Table::Counters;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (
            ref_id(&self.center, |c| c.id),
            ref_id(&self.department, |d| d.id),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub counter: CounterRef,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
    pub employee: Option<EmployeeRef>,
    pub center: Option<CenterRef>,
    pub department: Option<DepartmentRef>,
}

impl Replicated for CounterRecord {
    const TABLE: Table = Table::CounterRecords;

    fn remote_id(&self) -> Option<i64> {
        self.id
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (
            ref_id(&self.center, |c| c.id),
            ref_id(&self.department, |d| d.id),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: i64,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: Option<i32>,
    pub task_type: Option<TaskTypeRef>,
    pub target: Option<TaskTarget>,
    pub center: Option<CenterRef>,
    pub department: Option<DepartmentRef>,
    pub author: Option<EmployeeRef>,
    pub assignee: Option<EmployeeRef>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Replicated for Task {
    const TABLE: Table = Table::Tasks;

    fn remote_id(&self) -> Option<i64> {
        self.id
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (
            ref_id(&self.center, |c| c.id),
            ref_id(&self.department, |d| d.id),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskType {
    pub id: i64,
    pub name: String,
    pub department: Option<DepartmentRef>,
}

impl Replicated for TaskType {
    const TABLE: Table = Table::TaskTypes;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (None, ref_id(&self.department, |d| d.id))
    }
}

/// Enumerated values (task statuses, priorities, room statuses) for pickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnum {
    pub id: i64,
    pub kind: String,
    pub value: String,
    pub label: String,
    pub position: i32,
}

impl Replicated for TaskEnum {
    const TABLE: Table = Table::TaskEnums;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkTime {
    pub id: i64,
    pub employee: EmployeeRef,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub center: Option<CenterRef>,
    pub department: Option<DepartmentRef>,
}

impl Replicated for WorkTime {
    const TABLE: Table = Table::WorkTimes;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (
            ref_id(&self.center, |c| c.id),
            ref_id(&self.department, |d| d.id),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: i64,
    pub room: RoomRef,
    pub guest_name: String,
    pub arrival: NaiveDate,
    pub departure: NaiveDate,
    pub status: String,
    pub center: CenterRef,
}

impl Replicated for Reservation {
    const TABLE: Table = Table::Reservations;

    fn remote_id(&self) -> Option<i64> {
        Some(self.id)
    }

    fn security(&self) -> (Option<i64>, Option<i64>) {
        (Some(self.center.id), None)
    }
}
