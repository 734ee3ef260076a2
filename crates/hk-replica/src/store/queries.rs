pub const INSERT_ROW: &str = r#"
    INSERT INTO replica_rows (table_name, remote_id, sync_status, data, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
    RETURNING local_id, table_name, remote_id, sync_status, data, updated_at
"#;

pub const SELECT_ROW_BY_LOCAL_ID: &str = r#"
    SELECT local_id, table_name, remote_id, sync_status, data, updated_at
    FROM replica_rows
    WHERE local_id = ?1
"#;

pub const SELECT_ROW_BY_REMOTE_ID: &str = r#"
    SELECT local_id, table_name, remote_id, sync_status, data, updated_at
    FROM replica_rows
    WHERE table_name = ?1 AND remote_id = ?2
"#;

pub const SELECT_ROWS_BY_TABLE: &str = r#"
    SELECT local_id, table_name, remote_id, sync_status, data, updated_at
    FROM replica_rows
    WHERE table_name = ?1
    ORDER BY local_id ASC
"#;

pub const SELECT_UNSYNCED_ROWS: &str = r#"
    SELECT local_id, table_name, remote_id, sync_status, data, updated_at
    FROM replica_rows
    WHERE table_name = ?1 AND sync_status <> 'synced'
    ORDER BY local_id ASC
"#;

pub const COUNT_UNSYNCED_ROWS: &str = r#"
    SELECT COUNT(*) FROM replica_rows WHERE sync_status <> 'synced'
"#;

pub const UPDATE_ROW: &str = r#"
    UPDATE replica_rows
    SET remote_id = ?2, sync_status = ?3, data = ?4, updated_at = ?5
    WHERE local_id = ?1
"#;

pub const MARK_ROW_SYNCED: &str = r#"
    UPDATE replica_rows
    SET sync_status = 'synced', updated_at = ?2
    WHERE local_id = ?1
"#;

pub const DELETE_ROWS_BY_TABLE: &str = r#"
    DELETE FROM replica_rows WHERE table_name = ?1
"#;

pub const SELECT_SYNCED_REMOTE_IDS: &str = r#"
    SELECT local_id, remote_id
    FROM replica_rows
    WHERE table_name = ?1 AND sync_status = 'synced' AND remote_id IS NOT NULL
"#;

pub const DELETE_ROW: &str = r#"
    DELETE FROM replica_rows WHERE local_id = ?1
"#;

pub const INSERT_ATTACHMENT: &str = r#"
    INSERT INTO pending_attachments (local_id, file_name, content_type, content, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5)
"#;

pub const SELECT_ATTACHMENTS: &str = r#"
    SELECT file_name, content_type, content
    FROM pending_attachments
    WHERE local_id = ?1
    ORDER BY id ASC
"#;

pub const DELETE_ATTACHMENTS: &str = r#"
    DELETE FROM pending_attachments WHERE local_id = ?1
"#;

pub const INSERT_NOTIFICATION: &str = r#"
    INSERT INTO notifications
        (notification_id, topic, channel, title, body, data, read, timestamp)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#;

pub const SELECT_RECENT_NOTIFICATIONS: &str = r#"
    SELECT notification_id, topic, channel, title, body, data, read, timestamp
    FROM notifications
    ORDER BY timestamp DESC, row_id DESC
    LIMIT ?1
"#;

pub const MARK_NOTIFICATION_READ: &str = r#"
    UPDATE notifications SET read = 1 WHERE notification_id = ?1
"#;

pub const DELETE_NOTIFICATIONS_BEFORE: &str = r#"
    DELETE FROM notifications WHERE timestamp < ?1
"#;

pub const SELECT_PREFERENCE: &str = r#"
    SELECT value FROM preferences WHERE key = ?1
"#;

pub const UPSERT_PREFERENCE: &str = r#"
    INSERT INTO preferences (key, value)
    VALUES (?1, ?2)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#;

pub const DELETE_DUPLICATE_REMOTE_ROW: &str = r#"
    DELETE FROM replica_rows
    WHERE table_name = ?1 AND remote_id = ?2 AND local_id <> ?3
"#;
