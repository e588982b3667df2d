//! Append-only change log backed by SQLite
//!
//! Every accepted change gets a sequence number from the table's
//! `AUTOINCREMENT` key, so numbers are strictly increasing and never reused.
//! A batch is written inside one transaction and therefore lands on
//! contiguous sequence numbers.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::model::{ChangeKind, ChangeRecord, ChangesPage, NewChange};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS changes (
    sequence_number INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    change TEXT NOT NULL CHECK (change IN ('create', 'update')),
    name TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    recorded_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);";

/// Server-side change log.
pub struct ChangeLogStore {
    db: Mutex<Connection>,
}

impl ChangeLogStore {
    /// Open or create the log database at `path`.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        db.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "Change log opened");
        Ok(Self { db: Mutex::new(db) })
    }

    /// In-memory log, for embedding and tests.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let db = Connection::open_in_memory()?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Uncommitted transactions roll back on drop; a poisoned lock still
        // guards a consistent log.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a batch atomically and return the highest sequence number
    /// written.
    ///
    /// An empty batch writes nothing and returns the current head.
    pub fn append(&self, batch: &[NewChange]) -> Result<u64, SyncError> {
        for (index, change) in batch.iter().enumerate() {
            if change.id.is_empty() {
                return Err(SyncError::Validation(format!("change {}: empty id", index)));
            }
        }

        let mut conn = self.conn();
        if batch.is_empty() {
            return head_of(&conn);
        }

        let tx = conn.transaction()?;
        let mut last = 0u64;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO changes (id, change, name, completed, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for change in batch {
                stmt.execute(params![
                    change.id,
                    change.change.as_str(),
                    change.name,
                    change.completed,
                    change.deleted_at.map(|t| t.to_rfc3339()),
                ])?;
                last = tx.last_insert_rowid() as u64;
            }
        }
        tx.commit()?;

        debug!(count = batch.len(), sequence_number = last, "Appended batch");
        Ok(last)
    }

    /// Validate a raw JSON batch and append it.
    ///
    /// No record is written unless every record passes.
    pub fn append_raw(&self, batch: &[Value]) -> Result<u64, SyncError> {
        let changes = validate_batch(batch)?;
        self.append(&changes)
    }

    /// Records after `after_sequence`, ascending, plus the highest sequence
    /// number seen. With nothing new, `after_sequence` is echoed back.
    pub fn changes_since(&self, after_sequence: u64) -> Result<ChangesPage, SyncError> {
        // SQLite integers are signed; nothing is stored above i64::MAX.
        let bound = i64::try_from(after_sequence).unwrap_or(i64::MAX);
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT sequence_number, id, change, name, completed, deleted_at
             FROM changes
             WHERE sequence_number > ?1
             ORDER BY sequence_number ASC",
        )?;

        let rows = stmt.query_map([bound], |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut changes = Vec::new();
        for row in rows {
            let (sequence_number, id, change, name, completed, deleted_at) = row?;
            let Some(change) = ChangeKind::parse(&change) else {
                // The CHECK constraint makes this unreachable for rows we wrote.
                warn!(sequence_number, kind = %change, "Skipping row with unknown change kind");
                continue;
            };
            let deleted_at = match deleted_at {
                Some(raw) => Some(parse_timestamp(&raw).map_err(SyncError::Validation)?),
                None => None,
            };
            changes.push(ChangeRecord {
                change: NewChange {
                    id,
                    change,
                    name,
                    completed,
                    deleted_at,
                },
                sequence_number,
            });
        }

        let max_sequence = changes
            .last()
            .map(|c| c.sequence_number)
            .unwrap_or(after_sequence);

        Ok(ChangesPage {
            changes,
            max_sequence,
        })
    }

    /// Highest sequence number in the log, 0 when empty.
    pub fn head(&self) -> Result<u64, SyncError> {
        head_of(&self.conn())
    }
}

fn head_of(conn: &Connection) -> Result<u64, SyncError> {
    let head: Option<u64> =
        conn.query_row("SELECT MAX(sequence_number) FROM changes", [], |row| row.get(0))?;
    Ok(head.unwrap_or(0))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid deleted_at {:?}: {}", raw, e))
}

/// Shape-check a batch of raw change records.
///
/// Requires a non-empty string `id`, a `change` of `create` or `update` and a
/// string `name`. `completed` defaults to false and `deleted_at` to null.
pub fn validate_batch(batch: &[Value]) -> Result<Vec<NewChange>, SyncError> {
    batch
        .iter()
        .enumerate()
        .map(|(index, raw)| validate_record(raw).map_err(|e| SyncError::Validation(format!("change {}: {}", index, e))))
        .collect()
}

fn validate_record(raw: &Value) -> Result<NewChange, String> {
    let obj = raw.as_object().ok_or("not an object")?;

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        // Numeric ids are opaque identifiers too.
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err("missing or empty id".to_string()),
    };

    let change = obj
        .get("change")
        .and_then(Value::as_str)
        .and_then(ChangeKind::parse)
        .ok_or("change must be \"create\" or \"update\"")?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or("name must be a string")?
        .to_string();

    let completed = match obj.get("completed") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err("completed must be a boolean".to_string()),
    };

    let deleted_at = match obj.get("deleted_at") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(parse_timestamp(s)?),
        Some(_) => return Err("deleted_at must be a timestamp or null".to_string()),
    };

    Ok(NewChange {
        id,
        change,
        name,
        completed,
        deleted_at,
    })
}
