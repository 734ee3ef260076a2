//! Form-field encoding of the writable entities.
//!
//! Pending writes travel as multipart text fields (attachments as separate
//! file parts). Both sides use these types so the field names cannot drift.

use super::entities::{CounterRecord, Task};
use super::refs::TaskTarget;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::str::FromStr;

pub type FormFields = BTreeMap<String, String>;

pub const ATTACHMENT_FIELD: &str = "attachment";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },
    #[error("only one of assetId, locationId, roomId may be set")]
    AmbiguousTarget,
}

fn required<'a>(fields: &'a FormFields, name: &'static str) -> Result<&'a str, FormError> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or(FormError::Missing(name))
}

fn optional<T: FromStr>(fields: &FormFields, name: &'static str) -> Result<Option<T>, FormError> {
    match fields.get(name).map(|value| value.trim()) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<T>().map(Some).map_err(|_| FormError::Invalid {
            field: name,
            value: value.to_string(),
        }),
    }
}

fn optional_time(
    fields: &FormFields,
    name: &'static str,
) -> Result<Option<DateTime<Utc>>, FormError> {
    optional::<DateTime<Utc>>(fields, name)
}

fn push_opt<T: ToString>(
    out: &mut Vec<(&'static str, String)>,
    name: &'static str,
    value: &Option<T>,
) {
    if let Some(value) = value {
        out.push((name, value.to_string()));
    }
}

fn push_time(
    out: &mut Vec<(&'static str, String)>,
    name: &'static str,
    value: &Option<DateTime<Utc>>,
) {
    if let Some(value) = value {
        out.push((name, value.to_rfc3339()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKey {
    Asset(i64),
    Location(i64),
    Room(i64),
}

impl From<&TaskTarget> for TargetKey {
    fn from(target: &TaskTarget) -> Self {
        match target {
            TaskTarget::Asset(asset) => TargetKey::Asset(asset.id),
            TaskTarget::Location(location) => TargetKey::Location(location.id),
            TaskTarget::Room(room) => TargetKey::Room(room.id),
        }
    }
}

impl TargetKey {
    pub fn asset_id(&self) -> Option<i64> {
        match self {
            TargetKey::Asset(id) => Some(*id),
            _ => None,
        }
    }

    pub fn location_id(&self) -> Option<i64> {
        match self {
            TargetKey::Location(id) => Some(*id),
            _ => None,
        }
    }

    pub fn room_id(&self) -> Option<i64> {
        match self {
            TargetKey::Room(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskInput {
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: Option<i32>,
    pub task_type_id: Option<i64>,
    pub target: Option<TargetKey>,
    pub center_id: Option<i64>,
    pub department_id: Option<i64>,
    pub assignee_id: Option<i64>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskInput {
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status.clone(),
            priority: task.priority,
            task_type_id: task.task_type.as_ref().map(|t| t.id),
            target: task.target.as_ref().map(TargetKey::from),
            center_id: task.center.as_ref().map(|c| c.id),
            department_id: task.department.as_ref().map(|d| d.id),
            assignee_id: task.assignee.as_ref().map(|e| e.id),
            due_at: task.due_at,
            completed_at: task.completed_at,
        }
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("title", self.title.clone()),
            ("status", self.status.clone()),
        ];
        push_opt(&mut out, "description", &self.description);
        push_opt(&mut out, "priority", &self.priority);
        push_opt(&mut out, "taskTypeId", &self.task_type_id);
        match self.target {
            Some(TargetKey::Asset(id)) => out.push(("assetId", id.to_string())),
            Some(TargetKey::Location(id)) => out.push(("locationId", id.to_string())),
            Some(TargetKey::Room(id)) => out.push(("roomId", id.to_string())),
            None => {}
        }
        push_opt(&mut out, "centerId", &self.center_id);
        push_opt(&mut out, "departmentId", &self.department_id);
        push_opt(&mut out, "assigneeId", &self.assignee_id);
        push_time(&mut out, "dueAt", &self.due_at);
        push_time(&mut out, "completedAt", &self.completed_at);
        out
    }

    pub fn from_fields(fields: &FormFields) -> Result<Self, FormError> {
        let targets = [
            optional::<i64>(fields, "assetId")?.map(TargetKey::Asset),
            optional::<i64>(fields, "locationId")?.map(TargetKey::Location),
            optional::<i64>(fields, "roomId")?.map(TargetKey::Room),
        ];
        let mut set = targets.into_iter().flatten();
        let target = set.next();
        if set.next().is_some() {
            return Err(FormError::AmbiguousTarget);
        }

        Ok(Self {
            title: required(fields, "title")?.to_string(),
            description: fields
                .get("description")
                .filter(|value| !value.is_empty())
                .cloned(),
            status: required(fields, "status")?.to_string(),
            priority: optional(fields, "priority")?,
            task_type_id: optional(fields, "taskTypeId")?,
            target,
            center_id: optional(fields, "centerId")?,
            department_id: optional(fields, "departmentId")?,
            assignee_id: optional(fields, "assigneeId")?,
            due_at: optional_time(fields, "dueAt")?,
            completed_at: optional_time(fields, "completedAt")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterRecordInput {
    pub counter_id: i64,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
    pub center_id: Option<i64>,
    pub department_id: Option<i64>,
}

impl CounterRecordInput {
    pub fn from_record(record: &CounterRecord) -> Self {
        Self {
            counter_id: record.counter.id,
            value: record.value,
            recorded_at: record.recorded_at,
            center_id: record.center.as_ref().map(|c| c.id),
            department_id: record.department.as_ref().map(|d| d.id),
        }
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("counterId", self.counter_id.to_string()),
            ("value", self.value.to_string()),
            ("recordedAt", self.recorded_at.to_rfc3339()),
        ];
        push_opt(&mut out, "centerId", &self.center_id);
        push_opt(&mut out, "departmentId", &self.department_id);
        out
    }

    pub fn from_fields(fields: &FormFields) -> Result<Self, FormError> {
        let counter_id = required(fields, "counterId")?;
        let value = required(fields, "value")?;
        let recorded_at = required(fields, "recordedAt")?;

        Ok(Self {
            counter_id: counter_id.parse().map_err(|_| FormError::Invalid {
                field: "counterId",
                value: counter_id.to_string(),
            })?,
            value: value.parse().map_err(|_| FormError::Invalid {
                field: "value",
                value: value.to_string(),
            })?,
            recorded_at: recorded_at.parse().map_err(|_| FormError::Invalid {
                field: "recordedAt",
                value: recorded_at.to_string(),
            })?,
            center_id: optional(fields, "centerId")?,
            department_id: optional(fields, "departmentId")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatusInput {
    pub status: String,
}

impl RoomStatusInput {
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![("status", self.status.clone())]
    }

    pub fn from_fields(fields: &FormFields) -> Result<Self, FormError> {
        Ok(Self {
            status: required(fields, "status")?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FormFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn task_fields_parse_back() {
        let input = TaskInput {
            title: "Fix AC".to_string(),
            status: "open".to_string(),
            priority: Some(1),
            target: Some(TargetKey::Room(12)),
            center_id: Some(1),
            department_id: Some(5),
            ..TaskInput::default()
        };
        let encoded: FormFields = input
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(TaskInput::from_fields(&encoded).unwrap(), input);
    }

    #[test]
    fn task_requires_title_and_single_target() {
        assert_eq!(
            TaskInput::from_fields(&fields(&[("status", "open")])),
            Err(FormError::Missing("title"))
        );
        assert_eq!(
            TaskInput::from_fields(&fields(&[
                ("title", "x"),
                ("status", "open"),
                ("roomId", "1"),
                ("assetId", "2"),
            ])),
            Err(FormError::AmbiguousTarget)
        );
    }

    #[test]
    fn non_integer_ids_are_rejected() {
        let err = TaskInput::from_fields(&fields(&[
            ("title", "x"),
            ("status", "open"),
            ("centerId", "1 OR 1=1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, FormError::Invalid { field: "centerId", .. }));
    }

    #[test]
    fn counter_record_requires_value() {
        let err = CounterRecordInput::from_fields(&fields(&[
            ("counterId", "3"),
            ("recordedAt", "2024-05-01T08:00:00Z"),
        ]))
        .unwrap_err();
        assert_eq!(err, FormError::Missing("value"));

        let parsed = CounterRecordInput::from_fields(&fields(&[
            ("counterId", "3"),
            ("value", "12.5"),
            ("recordedAt", "2024-05-01T08:00:00Z"),
        ]))
        .unwrap();
        assert_eq!(parsed.counter_id, 3);
        assert_eq!(parsed.value, 12.5);
    }
}
