//! SQLite-backed DOI store.
//!
//! A single `dois` table keyed by the full DOI string. Timestamps are
//! epoch milliseconds. The connection sits behind a mutex; every write is
//! a single statement so retried operations cannot half-apply.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::doi::{Doi, DoiStatus, DoiType};
use crate::store::{DoiRecord, DoiStore, ListFilter, Page};
use crate::types::{MinterError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dois (
    doi          TEXT PRIMARY KEY,
    type         TEXT NOT NULL,
    status       TEXT NOT NULL,
    target       TEXT,
    metadata_xml TEXT,
    created      INTEGER NOT NULL,
    modified     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dois_status ON dois (status);
CREATE INDEX IF NOT EXISTS idx_dois_type ON dois (type);
";

/// SQLite implementation of the DOI persistence contract
pub struct SqliteDoiStore {
    conn: Mutex<Connection>,
}

impl SqliteDoiStore {
    /// Open (creating if needed) the database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.as_ref().display(), "DOI store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MinterError::Database("store mutex poisoned".to_string()))
    }
}

impl DoiStore for SqliteDoiStore {
    fn get(&self, doi: &Doi) -> Result<Option<DoiRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT doi, type, status, target, metadata_xml, created, modified
             FROM dois WHERE doi = ?1;",
        )?;

        let mut rows = stmt.query([doi.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    fn create(&self, doi: &Doi, doi_type: DoiType) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO dois (doi, type, status, target, metadata_xml, created, modified)
             VALUES (?1, ?2, ?3, NULL, NULL, ?4, ?4);",
            params![
                doi.to_string(),
                doi_type.as_str(),
                DoiStatus::New.as_str(),
                now
            ],
        )?;

        if inserted == 0 {
            return Err(MinterError::Exists(format!(
                "DOI {doi} already has a record"
            )));
        }
        Ok(())
    }

    fn update(
        &self,
        doi: &Doi,
        status: DoiStatus,
        target: Option<&str>,
        metadata_xml: Option<&str>,
    ) -> Result<()> {
        // Target is only meaningful for registered DOIs
        let target = if status == DoiStatus::Registered {
            target
        } else {
            None
        };

        let now = Utc::now().timestamp_millis();
        let conn = self.lock()?;

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM dois WHERE doi = ?1;",
                [doi.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let current: DoiStatus = match current.as_deref() {
            None => {
                return Err(MinterError::NotFound(format!("no record for DOI {doi}")));
            }
            Some(text) => text.parse()?,
        };

        if current == DoiStatus::Deleted && status != DoiStatus::Deleted {
            return Err(MinterError::Exists(format!(
                "DOI {doi} is deleted and cannot change status"
            )));
        }

        // Transitions only move forward; the one allowed cycle is
        // REGISTERED -> REGISTERED on a metadata refresh
        if status_rank(status) < status_rank(current) {
            return Err(MinterError::Exists(format!(
                "DOI {doi} cannot move backward from {} to {}",
                current.as_str(),
                status.as_str()
            )));
        }

        conn.execute(
            "UPDATE dois
             SET status = ?2,
                 target = ?3,
                 metadata_xml = COALESCE(?4, metadata_xml),
                 modified = ?5
             WHERE doi = ?1;",
            params![doi.to_string(), status.as_str(), target, metadata_xml, now],
        )?;

        Ok(())
    }

    fn delete(&self, doi: &Doi) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE dois
             SET status = ?2, target = NULL, modified = ?3
             WHERE doi = ?1;",
            params![doi.to_string(), DoiStatus::Deleted.as_str(), now],
        )?;

        if changed == 0 {
            return Err(MinterError::NotFound(format!("no record for DOI {doi}")));
        }
        Ok(())
    }

    fn list(&self, filter: &ListFilter, page: &Page) -> Result<Vec<DoiRecord>> {
        let mut sql = String::from(
            "SELECT doi, type, status, target, metadata_xml, created, modified
             FROM dois WHERE 1 = 1",
        );
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(doi_type) = filter.doi_type {
            sql.push_str(" AND type = ?");
            bind_values.push(Value::Text(doi_type.as_str().to_string()));
        }

        sql.push_str(" ORDER BY created DESC, doi ASC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(page.effective_limit())));
        if page.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(page.offset)));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_record(row)?);
        }
        Ok(records)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<DoiRecord> {
    let doi_text: String = row.get("doi")?;
    let type_text: String = row.get("type")?;
    let status_text: String = row.get("status")?;
    let created_ms: i64 = row.get("created")?;
    let modified_ms: i64 = row.get("modified")?;

    Ok(DoiRecord {
        doi: doi_text.parse()?,
        doi_type: type_text.parse()?,
        status: status_text.parse()?,
        target: row.get("target")?,
        metadata_xml: row.get("metadata_xml")?,
        created: millis_to_datetime(created_ms)?,
        modified: millis_to_datetime(modified_ms)?,
    })
}

/// Position of a status in the NEW -> RESERVED -> REGISTERED -> DELETED
/// lifecycle, for the backward-transition guard
fn status_rank(status: DoiStatus) -> u8 {
    match status {
        DoiStatus::New => 0,
        DoiStatus::Reserved => 1,
        DoiStatus::Registered => 2,
        DoiStatus::Deleted => 3,
    }
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| MinterError::Database(format!("invalid timestamp {ms} in dois table")))
}
