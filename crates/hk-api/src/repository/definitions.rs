use super::{FilterClause, QueryDefinition, Viewer};
use hk_core::model::*;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;

fn named<T>(
    row: &PgRow,
    id_column: &str,
    name_column: &str,
    build: fn(i64, String) -> T,
) -> Result<Option<T>, sqlx::Error> {
    let id: Option<i64> = row.try_get(id_column)?;
    match id {
        Some(id) => Ok(Some(build(id, row.try_get(name_column)?))),
        None => Ok(None),
    }
}

fn center(row: &PgRow) -> Result<Option<CenterRef>, sqlx::Error> {
    named(row, "center_id", "center_name", |id, name| CenterRef { id, name })
}

fn department(row: &PgRow) -> Result<Option<DepartmentRef>, sqlx::Error> {
    named(row, "department_id", "department_name", |id, name| {
        DepartmentRef { id, name }
    })
}

fn location(row: &PgRow) -> Result<Option<LocationRef>, sqlx::Error> {
    named(row, "location_id", "location_name", |id, name| LocationRef {
        id,
        name,
    })
}

fn room(row: &PgRow) -> Result<Option<RoomRef>, sqlx::Error> {
    named(row, "room_id", "room_number", |id, number| RoomRef { id, number })
}

fn employee(row: &PgRow, prefix: &str) -> Result<Option<EmployeeRef>, sqlx::Error> {
    let id: Option<i64> = row.try_get(format!("{prefix}_id").as_str())?;
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(Some(EmployeeRef {
        id,
        first_name: row.try_get(format!("{prefix}_first_name").as_str())?,
        last_name: row.try_get(format!("{prefix}_last_name").as_str())?,
    }))
}

fn asset(row: &PgRow) -> Result<Option<AssetRef>, sqlx::Error> {
    let id: Option<i64> = row.try_get("asset_id")?;
    let Some(id) = id else {
        return Ok(None);
    };
    Ok(Some(AssetRef {
        id,
        name: row.try_get("asset_name")?,
        code: row.try_get("asset_code")?,
    }))
}

fn required<T>(value: Option<T>, column: &str) -> Result<T, sqlx::Error> {
    value.ok_or_else(|| sqlx::Error::ColumnNotFound(column.to_string()))
}

pub struct CenterQuery;

impl QueryDefinition for CenterQuery {
    type Entity = Center;

    const PK: &'static str = "c.id";
    const SEC_CENTER: Option<&'static str> = Some("c.id");
    const SEC_DEPARTMENT: Option<&'static str> = None;
    const PROJECTION: &'static str = "c.id, c.name, c.code, c.timezone";
    const FROM: &'static str = "FROM hk.centers c";
    const SORTABLE: &'static [&'static str] = &["id", "name", "code"];

    fn map_row(&self, row: &PgRow) -> Result<Center, sqlx::Error> {
        Ok(Center {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            code: row.try_get("code")?,
            timezone: row.try_get("timezone")?,
        })
    }
}

pub struct DepartmentQuery;

impl QueryDefinition for DepartmentQuery {
    type Entity = Department;

    const PK: &'static str = "d.id";
    const SEC_CENTER: Option<&'static str> = None;
    const SEC_DEPARTMENT: Option<&'static str> = Some("d.id");
    const PROJECTION: &'static str = "d.id, d.name";
    const FROM: &'static str = "FROM hk.departments d";
    const SORTABLE: &'static [&'static str] = &["id", "name"];

    fn map_row(&self, row: &PgRow) -> Result<Department, sqlx::Error> {
        Ok(Department {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }
}

pub struct EmployeeQuery;

impl QueryDefinition for EmployeeQuery {
    type Entity = Employee;

    const PK: &'static str = "e.id";
    const SEC_CENTER: Option<&'static str> = Some("e.center_id");
    const SEC_DEPARTMENT: Option<&'static str> = Some("e.department_id");
    const PROJECTION: &'static str = "e.id, e.username, e.first_name, e.last_name, e.email, \
         e.center_id, c.name AS center_name, e.department_id, d.name AS department_name";
    const FROM: &'static str = "FROM hk.employees e \
         LEFT JOIN hk.centers c ON c.id = e.center_id \
         LEFT JOIN hk.departments d ON d.id = e.department_id";
    const SORTABLE: &'static [&'static str] = &["id", "username", "last_name", "first_name"];

    fn map_row(&self, row: &PgRow) -> Result<Employee, sqlx::Error> {
        Ok(Employee {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            email: row.try_get("email")?,
            center: center(row)?,
            department: department(row)?,
        })
    }
}

pub struct RoomQuery;

impl QueryDefinition for RoomQuery {
    type Entity = Room;

    const PK: &'static str = "r.id";
    const SEC_CENTER: Option<&'static str> = Some("r.center_id");
    const SEC_DEPARTMENT: Option<&'static str> = None;
    const PROJECTION: &'static str = "r.id, r.number, r.floor, r.room_type, r.status, \
         r.center_id, c.name AS center_name, r.updated_at";
    const FROM: &'static str = "FROM hk.rooms r JOIN hk.centers c ON c.id = r.center_id";
    const SORTABLE: &'static [&'static str] = &["id", "number", "floor", "status", "updated_at"];

    fn map_row(&self, row: &PgRow) -> Result<Room, sqlx::Error> {
        Ok(Room {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            floor: row.try_get("floor")?,
            room_type: row.try_get("room_type")?,
            status: row.try_get("status")?,
            center: required(center(row)?, "center_id")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub struct AssetQuery;

impl QueryDefinition for AssetQuery {
    type Entity = Asset;

    const PK: &'static str = "a.id";
    const SEC_CENTER: Option<&'static str> = Some("a.center_id");
    const SEC_DEPARTMENT: Option<&'static str> = Some("a.department_id");
    const PROJECTION: &'static str = "a.id, a.name, a.code, \
         a.center_id, c.name AS center_name, a.department_id, d.name AS department_name, \
         a.location_id, l.name AS location_name, a.room_id, r.number AS room_number";
    const FROM: &'static str = "FROM hk.assets a \
         LEFT JOIN hk.centers c ON c.id = a.center_id \
         LEFT JOIN hk.departments d ON d.id = a.department_id \
         LEFT JOIN hk.locations l ON l.id = a.location_id \
         LEFT JOIN hk.rooms r ON r.id = a.room_id";
    const SORTABLE: &'static [&'static str] = &["id", "name", "code"];

    fn map_row(&self, row: &PgRow) -> Result<Asset, sqlx::Error> {
        Ok(Asset {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            code: row.try_get("code")?,
            center: center(row)?,
            department: department(row)?,
            location: location(row)?,
            room: room(row)?,
        })
    }
}

pub struct CounterQuery;

impl QueryDefinition for CounterQuery {
    type Entity = Counter;

    const PK: &'static str = "k.id";
    const SEC_CENTER: Option<&'static str> = Some("k.center_id");
    const SEC_DEPARTMENT: Option<&'static str> = Some("k.department_id");
    const PROJECTION: &'static str = "k.id, k.name, k.unit, \
         k.asset_id, a.name AS asset_name, a.code AS asset_code, \
         k.center_id, c.name AS center_name, k.department_id, d.name AS department_name";
    const FROM: &'static str = "FROM hk.counters k \
         LEFT JOIN hk.assets a ON a.id = k.asset_id \
         LEFT JOIN hk.centers c ON c.id = k.center_id \
         LEFT JOIN hk.departments d ON d.id = k.department_id";
    const SORTABLE: &'static [&'static str] = &["id", "name"];

    fn map_row(&self, row: &PgRow) -> Result<Counter, sqlx::Error> {
        Ok(Counter {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            unit: row.try_get("unit")?,
            asset: asset(row)?,
            center: center(row)?,
            department: department(row)?,
        })
    }
}

pub struct CounterRecordQuery;

impl QueryDefinition for CounterRecordQuery {
    type Entity = CounterRecord;

    const PK: &'static str = "cr.id";
    const SEC_CENTER: Option<&'static str> = Some("cr.center_id");
    const SEC_DEPARTMENT: Option<&'static str> = Some("cr.department_id");
    const PROJECTION: &'static str = "cr.id, cr.counter_id, k.name AS counter_name, \
         k.unit AS counter_unit, cr.value, cr.recorded_at, \
         cr.employee_id, e.first_name AS employee_first_name, e.last_name AS employee_last_name, \
         cr.center_id, c.name AS center_name, cr.department_id, d.name AS department_name";
    const FROM: &'static str = "FROM hk.counter_records cr \
         JOIN hk.counters k ON k.id = cr.counter_id \
         LEFT JOIN hk.employees e ON e.id = cr.employee_id \
         LEFT JOIN hk.centers c ON c.id = cr.center_id \
         LEFT JOIN hk.departments d ON d.id = cr.department_id";
    const SORTABLE: &'static [&'static str] = &["id", "counter_id", "recorded_at", "value"];

    fn map_row(&self, row: &PgRow) -> Result<CounterRecord, sqlx::Error> {
        Ok(CounterRecord {
            id: Some(row.try_get("id")?),
            counter: CounterRef {
                id: row.try_get("counter_id")?,
                name: row.try_get("counter_name")?,
                unit: row.try_get("counter_unit")?,
            },
            value: row.try_get("value")?,
            recorded_at: row.try_get("recorded_at")?,
            employee: employee(row, "employee")?,
            center: center(row)?,
            department: department(row)?,
        })
    }
}

pub struct TaskQuery;

impl QueryDefinition for TaskQuery {
    type Entity = Task;

    const PK: &'static str = "t.id";
    const SEC_CENTER: Option<&'static str> = Some("t.center_id");
    const SEC_DEPARTMENT: Option<&'static str> = Some("t.department_id");
    const PROJECTION: &'static str = "t.id, t.title, t.description, t.status, t.priority, \
         t.task_type_id, tt.name AS task_type_name, \
         t.asset_id, a.name AS asset_name, a.code AS asset_code, \
         t.location_id, l.name AS location_name, t.room_id, r.number AS room_number, \
         t.center_id, c.name AS center_name, t.department_id, d.name AS department_name, \
         t.author_id, au.first_name AS author_first_name, au.last_name AS author_last_name, \
         t.assignee_id, asg.first_name AS assignee_first_name, \
         asg.last_name AS assignee_last_name, \
         t.due_at, t.completed_at, t.created_at, t.updated_at, \
         COALESCE((SELECT json_agg(json_build_object('id', x.id, 'fileName', x.file_name, \
         'contentType', x.content_type, 'sizeBytes', x.size_bytes) ORDER BY x.id) \
         FROM hk.task_attachments x WHERE x.task_id = t.id), '[]'::json) AS attachments";
    const FROM: &'static str = "FROM hk.tasks t \
         LEFT JOIN hk.task_types tt ON tt.id = t.task_type_id \
         LEFT JOIN hk.assets a ON a.id = t.asset_id \
         LEFT JOIN hk.locations l ON l.id = t.location_id \
         LEFT JOIN hk.rooms r ON r.id = t.room_id \
         LEFT JOIN hk.centers c ON c.id = t.center_id \
         LEFT JOIN hk.departments d ON d.id = t.department_id \
         LEFT JOIN hk.employees au ON au.id = t.author_id \
         LEFT JOIN hk.employees asg ON asg.id = t.assignee_id";
    const SORTABLE: &'static [&'static str] = &[
        "id",
        "title",
        "status",
        "priority",
        "due_at",
        "created_at",
        "updated_at",
    ];

    /// Authors always see their own tasks, whatever their department grant.
    fn widen_filter(&self, viewer: &Viewer) -> Option<FilterClause> {
        Some(FilterClause::ColumnEquals {
            column: "author_id",
            value: viewer.user_id,
        })
    }

    fn map_row(&self, row: &PgRow) -> Result<Task, sqlx::Error> {
        let attachments: Json<Vec<Attachment>> = row.try_get("attachments")?;
        Ok(Task {
            id: Some(row.try_get("id")?),
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            task_type: named(row, "task_type_id", "task_type_name", |id, name| {
                TaskTypeRef { id, name }
            })?,
            target: TaskTarget::resolve(asset(row)?, location(row)?, room(row)?),
            center: center(row)?,
            department: department(row)?,
            author: employee(row, "author")?,
            assignee: employee(row, "assignee")?,
            due_at: row.try_get("due_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            attachments: attachments.0,
        })
    }
}

pub struct TaskTypeQuery;

impl QueryDefinition for TaskTypeQuery {
    type Entity = TaskType;

    const PK: &'static str = "tt.id";
    const SEC_CENTER: Option<&'static str> = None;
    const SEC_DEPARTMENT: Option<&'static str> = Some("tt.department_id");
    const PROJECTION: &'static str =
        "tt.id, tt.name, tt.department_id, d.name AS department_name";
    const FROM: &'static str =
        "FROM hk.task_types tt LEFT JOIN hk.departments d ON d.id = tt.department_id";
    const SORTABLE: &'static [&'static str] = &["id", "name"];

    fn map_row(&self, row: &PgRow) -> Result<TaskType, sqlx::Error> {
        Ok(TaskType {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            department: department(row)?,
        })
    }
}

pub struct TaskEnumQuery;

impl QueryDefinition for TaskEnumQuery {
    type Entity = TaskEnum;

    const PK: &'static str = "te.id";
    const SEC_CENTER: Option<&'static str> = None;
    const SEC_DEPARTMENT: Option<&'static str> = None;
    const PROJECTION: &'static str = "te.id, te.kind, te.value, te.label, te.position";
    const FROM: &'static str = "FROM hk.task_enums te";
    const SORTABLE: &'static [&'static str] = &["id", "kind", "position"];

    fn map_row(&self, row: &PgRow) -> Result<TaskEnum, sqlx::Error> {
        Ok(TaskEnum {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            value: row.try_get("value")?,
            label: row.try_get("label")?,
            position: row.try_get("position")?,
        })
    }
}

pub struct WorkTimeQuery;

impl QueryDefinition for WorkTimeQuery {
    type Entity = WorkTime;

    const PK: &'static str = "w.id";
    const SEC_CENTER: Option<&'static str> = Some("w.center_id");
    const SEC_DEPARTMENT: Option<&'static str> = Some("w.department_id");
    const PROJECTION: &'static str = "w.id, w.employee_id, \
         e.first_name AS employee_first_name, e.last_name AS employee_last_name, \
         w.started_at, w.ended_at, \
         w.center_id, c.name AS center_name, w.department_id, d.name AS department_name";
    const FROM: &'static str = "FROM hk.work_times w \
         JOIN hk.employees e ON e.id = w.employee_id \
         LEFT JOIN hk.centers c ON c.id = w.center_id \
         LEFT JOIN hk.departments d ON d.id = w.department_id";
    const SORTABLE: &'static [&'static str] = &["id", "started_at", "ended_at"];

    fn map_row(&self, row: &PgRow) -> Result<WorkTime, sqlx::Error> {
        Ok(WorkTime {
            id: row.try_get("id")?,
            employee: required(employee(row, "employee")?, "employee_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            center: center(row)?,
            department: department(row)?,
        })
    }
}

pub struct ReservationQuery;

impl QueryDefinition for ReservationQuery {
    type Entity = Reservation;

    const PK: &'static str = "rv.id";
    const SEC_CENTER: Option<&'static str> = Some("rv.center_id");
    const SEC_DEPARTMENT: Option<&'static str> = None;
    const PROJECTION: &'static str = "rv.id, rv.room_id, r.number AS room_number, \
         rv.guest_name, rv.arrival, rv.departure, rv.status, \
         rv.center_id, c.name AS center_name";
    const FROM: &'static str = "FROM hk.reservations rv \
         JOIN hk.rooms r ON r.id = rv.room_id \
         JOIN hk.centers c ON c.id = rv.center_id";
    const SORTABLE: &'static [&'static str] = &["id", "arrival", "departure", "status"];

    fn map_row(&self, row: &PgRow) -> Result<Reservation, sqlx::Error> {
        Ok(Reservation {
            id: row.try_get("id")?,
            room: required(room(row)?, "room_id")?,
            guest_name: row.try_get("guest_name")?,
            arrival: row.try_get("arrival")?,
            departure: row.try_get("departure")?,
            status: row.try_get("status")?,
            center: required(center(row)?, "center_id")?,
        })
    }
}
