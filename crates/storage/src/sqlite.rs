use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use sheetkeep_core::{
    Field, Row, RowId,
    normalize::{format_minutes_to_time, parse_time_to_minutes},
};

use crate::error::StorageError;
use crate::traits::{Receipt, RecordStore, WriteDisposition};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

/// Columns as persisted, after normalisation and validation.
struct DraftColumns {
    date: String,
    time_in: u32,
    time_out: u32,
    project: String,
    tool: Option<String>,
    charge_code: Option<String>,
    task_description: String,
}

impl DraftColumns {
    fn from_row(row: &Row) -> Result<Self, StorageError> {
        let row = row.normalized();
        let required = |field: Field| {
            row.get(field)
                .map(str::to_string)
                .ok_or_else(|| StorageError::Rejected(format!("{} is required", field.label())))
        };
        let date = required(Field::Date)?;
        let time_in = parse_time_to_minutes(&required(Field::TimeIn)?).map_err(StorageError::Rejected)?;
        let time_out =
            parse_time_to_minutes(&required(Field::TimeOut)?).map_err(StorageError::Rejected)?;
        if time_out <= time_in {
            return Err(StorageError::Rejected("Time Out must be after Time In".into()));
        }
        Ok(Self {
            date,
            time_in,
            time_out,
            project: required(Field::Project)?,
            tool: row.tool.clone(),
            charge_code: row.charge_code.clone(),
            task_description: required(Field::TaskDescription)?,
        })
    }

    fn hours(&self) -> f64 {
        f64::from(self.time_out - self.time_in) / 60.0
    }
}

const SELECT_DRAFT: &str = "SELECT id, date, time_in, time_out, project, tool, detail_charge_code, task_description FROM timesheet";

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<(Vec<u8>, Row)> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let time_in: u32 = row.get(2)?;
    let time_out: u32 = row.get(3)?;
    Ok((
        id_bytes,
        Row {
            id: None,
            date: Some(row.get(1)?),
            time_in: Some(format_minutes_to_time(time_in)),
            time_out: Some(format_minutes_to_time(time_out)),
            project: Some(row.get(4)?),
            tool: row.get(5)?,
            charge_code: row.get(6)?,
            task_description: Some(row.get(7)?),
        },
    ))
}

fn with_id((id_bytes, mut row): (Vec<u8>, Row)) -> Result<Row, StorageError> {
    row.id = Some(RowId::from_bytes(to_array::<16>(id_bytes, "id")?));
    Ok(row)
}

fn map_constraint(err: rusqlite::Error, what: &str) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            StorageError::ConstraintViolation(what.to_string())
        }
        e => StorageError::Sqlite(e),
    }
}

/// Draft timesheet records in a single SQLite database.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn fetch(conn: &Connection, id: RowId) -> Result<Option<Row>, StorageError> {
        let found = conn
            .query_row(
                &format!("{SELECT_DRAFT} WHERE id = ?1"),
                rusqlite::params![id.as_bytes().as_slice()],
                read_row,
            )
            .optional()?;
        found.map(with_id).transpose()
    }

    /// Insert a draft, or fold it into an existing draft with the same
    /// date, start time, project and description.
    pub fn insert_draft(&self, row: &Row) -> Result<Receipt, StorageError> {
        let cols = DraftColumns::from_row(row)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<Vec<u8>> = tx
            .query_row(
                "SELECT id FROM timesheet WHERE date = ?1 AND time_in = ?2 AND project = ?3 AND task_description = ?4 AND status IS NULL",
                rusqlite::params![cols.date, cols.time_in, cols.project, cols.task_description],
                |r| r.get(0),
            )
            .optional()?;

        let (id, disposition) = match existing {
            Some(bytes) => {
                let id = RowId::from_bytes(to_array::<16>(bytes, "id")?);
                tx.execute(
                    "UPDATE timesheet SET time_out = ?1, hours = ?2, tool = ?3, detail_charge_code = ?4,
                         updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
                     WHERE id = ?5",
                    rusqlite::params![
                        cols.time_out,
                        cols.hours(),
                        cols.tool,
                        cols.charge_code,
                        id.as_bytes().as_slice(),
                    ],
                )?;
                (id, WriteDisposition::Merged)
            }
            None => {
                let id = RowId::new();
                tx.execute(
                    "INSERT INTO timesheet (id, date, time_in, time_out, hours, project, tool, detail_charge_code, task_description)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        id.as_bytes().as_slice(),
                        cols.date,
                        cols.time_in,
                        cols.time_out,
                        cols.hours(),
                        cols.project,
                        cols.tool,
                        cols.charge_code,
                        cols.task_description,
                    ],
                )
                .map_err(|e| map_constraint(e, "timesheet entry already submitted"))?;
                (id, WriteDisposition::Created)
            }
        };

        let record = Self::fetch(&tx, id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        tx.commit()?;
        debug!(id = %id, disposition = disposition.as_str(), "draft written");
        Ok(Receipt {
            record,
            disposition,
        })
    }

    pub fn update_draft(&self, row: &Row) -> Result<Receipt, StorageError> {
        let id = row
            .id
            .ok_or_else(|| StorageError::Rejected("update requires an identity".into()))?;
        let cols = DraftColumns::from_row(row)?;
        let conn = self.conn()?;
        let changes = conn
            .execute(
                "UPDATE timesheet
                 SET date = ?1, time_in = ?2, time_out = ?3, hours = ?4, project = ?5, tool = ?6,
                     detail_charge_code = ?7, task_description = ?8,
                     updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
                 WHERE id = ?9 AND status IS NULL",
                rusqlite::params![
                    cols.date,
                    cols.time_in,
                    cols.time_out,
                    cols.hours(),
                    cols.project,
                    cols.tool,
                    cols.charge_code,
                    cols.task_description,
                    id.as_bytes().as_slice(),
                ],
            )
            .map_err(|e| map_constraint(e, "another entry has the same date, time and description"))?;
        if changes == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        let record = Self::fetch(&conn, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        debug!(id = %id, "draft updated");
        Ok(Receipt {
            record,
            disposition: WriteDisposition::Updated,
        })
    }

    /// Only drafts can be deleted; submitted entries are left alone.
    pub fn delete_draft(&self, id: RowId) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "DELETE FROM timesheet WHERE id = ?1 AND status IS NULL",
            rusqlite::params![id.as_bytes().as_slice()],
        )?;
        if changes == 0 {
            return Err(StorageError::NotFound(format!("draft entry {id}")));
        }
        debug!(id = %id, "draft deleted");
        Ok(())
    }

    pub fn list_drafts(&self) -> Result<Vec<Row>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_DRAFT} WHERE status IS NULL ORDER BY date ASC, time_in ASC"
        ))?;
        let rows = stmt.query_map([], read_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(with_id(row?)?);
        }
        Ok(result)
    }

    /// Total recorded hours across drafts.
    pub fn draft_hours(&self) -> Result<f64, StorageError> {
        let conn = self.conn()?;
        let total: Option<f64> = conn.query_row(
            "SELECT SUM(hours) FROM timesheet WHERE status IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(total.unwrap_or(0.0))
    }

    /// Mark a draft as submitted; submitted entries drop out of the draft
    /// listing.
    pub fn mark_submitted(&self, id: RowId) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let changes = conn.execute(
            "UPDATE timesheet SET status = 'Complete', submitted_at = datetime('now') WHERE id = ?1 AND status IS NULL",
            rusqlite::params![id.as_bytes().as_slice()],
        )?;
        if changes == 0 {
            return Err(StorageError::NotFound(format!("draft entry {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteStorage {
    async fn create(&self, row: &Row) -> Result<Receipt, StorageError> {
        self.insert_draft(row)
    }

    async fn update(&self, row: &Row) -> Result<Receipt, StorageError> {
        self.update_draft(row)
    }

    async fn delete(&self, id: RowId) -> Result<(), StorageError> {
        self.delete_draft(id)
    }

    async fn list_all(&self) -> Result<Vec<Row>, StorageError> {
        self.list_drafts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(date: &str, start: &str, end: &str, task: &str) -> Row {
        Row::blank()
            .with(Field::Date, date)
            .with(Field::TimeIn, start)
            .with(Field::TimeOut, end)
            .with(Field::Project, "Internal")
            .with(Field::TaskDescription, task)
    }

    #[tokio::test]
    async fn create_assigns_identity_and_normalizes() -> Result<(), StorageError> {
        let store = SqliteStorage::open_in_memory()?;
        let receipt = store.create(&entry("01/06/2025", "9:00", "10:30", " Planning ")).await?;
        assert_eq!(receipt.disposition, WriteDisposition::Created);
        let record = receipt.record;
        assert!(record.id.is_some());
        assert_eq!(record.date.as_deref(), Some("2025-01-06"));
        assert_eq!(record.time_in.as_deref(), Some("09:00"));
        assert_eq!(record.task_description.as_deref(), Some("Planning"));
        assert!((store.draft_hours()? - 1.5).abs() < f64::EPSILON);
        Ok(())
    }

    #[tokio::test]
    async fn create_with_same_natural_key_merges() -> Result<(), StorageError> {
        let store = SqliteStorage::open_in_memory()?;
        let first = store.create(&entry("2025-01-06", "09:00", "10:00", "Planning")).await?;
        let second = store.create(&entry("2025-01-06", "09:00", "11:00", "Planning")).await?;
        assert_eq!(second.disposition, WriteDisposition::Merged);
        assert_eq!(first.record.id, second.record.id);
        assert_eq!(second.record.time_out.as_deref(), Some("11:00"));
        assert_eq!(store.list_all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn update_and_delete_require_a_draft() -> Result<(), StorageError> {
        let store = SqliteStorage::open_in_memory()?;
        let mut row = store.create(&entry("2025-01-06", "09:00", "10:00", "Planning")).await?.record;
        row.set(Field::TaskDescription, Some("Review".into()));
        let receipt = store.update(&row).await?;
        assert_eq!(receipt.record.task_description.as_deref(), Some("Review"));

        let id = row.id.ok_or_else(|| StorageError::NotFound("created draft has no id".into()))?;
        store.mark_submitted(id)?;
        assert!(matches!(store.update(&row).await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete(id).await, Err(StorageError::NotFound(_))));
        assert!(store.list_all().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn incomplete_rows_are_rejected() -> Result<(), StorageError> {
        let store = SqliteStorage::open_in_memory()?;
        let mut row = entry("2025-01-06", "09:00", "10:00", "Planning");
        row.project = None;
        assert!(matches!(store.create(&row).await, Err(StorageError::Rejected(_))));
        let backwards = entry("2025-01-06", "10:00", "09:00", "Planning");
        assert!(matches!(store.create(&backwards).await, Err(StorageError::Rejected(_))));
        Ok(())
    }

    #[tokio::test]
    async fn listing_is_ordered_and_survives_reopen() -> Result<(), StorageError> {
        let dir = tempfile::tempdir().map_err(|e| StorageError::Serialization(e.to_string()))?;
        let path = dir.path().join("drafts.sqlite");
        let path = path.to_str().unwrap_or_default().to_string();
        {
            let store = SqliteStorage::open(&path)?;
            store.create(&entry("2025-01-07", "08:00", "09:00", "b")).await?;
            store.create(&entry("2025-01-06", "13:00", "14:00", "a2")).await?;
            store.create(&entry("2025-01-06", "08:00", "09:00", "a1")).await?;
        }
        let store = SqliteStorage::open(&path)?;
        let tasks: Vec<String> = store
            .list_all()
            .await?
            .into_iter()
            .filter_map(|r| r.task_description)
            .collect();
        assert_eq!(tasks, vec!["a1", "a2", "b"]);
        Ok(())
    }
}
