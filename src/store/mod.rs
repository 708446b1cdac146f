//! DOI persistence store - the source of truth for what the registry
//! believes about each DOI.
//!
//! # Invariants
//! - Exactly one record per DOI; duplicate creation fails with `Exists`.
//! - `target` is persisted only for REGISTERED records.
//! - DELETED is a soft tombstone: the row is retained so the suffix is
//!   never reused, and no write moves a record out of DELETED.

pub mod sqlite;

pub use sqlite::SqliteDoiStore;

use chrono::{DateTime, Utc};

use crate::doi::{Doi, DoiStatus, DoiType};
use crate::types::Result;

/// Persisted state of one DOI
#[derive(Debug, Clone, PartialEq)]
pub struct DoiRecord {
    pub doi: Doi,
    pub doi_type: DoiType,
    pub status: DoiStatus,
    /// Landing page URL; non-null only when REGISTERED
    pub target: Option<String>,
    /// DataCite metadata document last sent or queued for this DOI
    pub metadata_xml: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Optional filters for listing records
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<DoiStatus>,
    pub doi_type: Option<DoiType>,
}

const LIST_DEFAULT_LIMIT: u32 = 20;
const LIST_LIMIT_MAX: u32 = 100;

/// Limit/offset paging for list queries
#[derive(Debug, Clone)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: LIST_DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    /// Effective limit, clamped to the maximum page size
    pub fn effective_limit(&self) -> u32 {
        match self.limit {
            0 => LIST_DEFAULT_LIMIT,
            value if value > LIST_LIMIT_MAX => LIST_LIMIT_MAX,
            value => value,
        }
    }
}

/// Persistence contract for DOI records.
///
/// All write operations are single-row, atomic, and safe to retry: the
/// update consumer redelivers messages on transient failure and applies
/// them again.
pub trait DoiStore: Send + Sync {
    /// Fetch one record. Absence is `Ok(None)`, not an error.
    fn get(&self, doi: &Doi) -> Result<Option<DoiRecord>>;

    /// Insert a fresh record with status NEW. Fails with `Exists` if the
    /// DOI already has a row.
    fn create(&self, doi: &Doi, doi_type: DoiType) -> Result<()>;

    /// Overwrite status/target/metadata on an existing row. Fails with
    /// `NotFound` if absent and with `Exists` when asked to move a
    /// DELETED record to any other status. `target` is only persisted
    /// when the new status is REGISTERED.
    fn update(
        &self,
        doi: &Doi,
        status: DoiStatus,
        target: Option<&str>,
        metadata_xml: Option<&str>,
    ) -> Result<()>;

    /// Soft-delete: set status DELETED and clear the target, keeping the
    /// row as an audit tombstone. Idempotent on an already-deleted row.
    fn delete(&self, doi: &Doi) -> Result<()>;

    /// List records matching the filter, newest first
    fn list(&self, filter: &ListFilter, page: &Page) -> Result<Vec<DoiRecord>>;
}
