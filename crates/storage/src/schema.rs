use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS timesheet (
    id BLOB PRIMARY KEY CHECK (length(id) = 16),
    date TEXT NOT NULL,
    time_in INTEGER NOT NULL CHECK (time_in BETWEEN 0 AND 1439),
    time_out INTEGER NOT NULL CHECK (time_out BETWEEN 1 AND 1440),
    hours REAL NOT NULL,
    project TEXT NOT NULL,
    tool TEXT,
    detail_charge_code TEXT,
    task_description TEXT NOT NULL,
    status TEXT,
    submitted_at TEXT,
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    updated_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER)),
    CHECK (time_out > time_in),
    UNIQUE (date, time_in, project, task_description)
);
CREATE INDEX IF NOT EXISTS idx_timesheet_drafts ON timesheet (date, time_in) WHERE status IS NULL;
";
