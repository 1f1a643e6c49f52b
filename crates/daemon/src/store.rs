//! Durable job store.
//!
//! A single SQLite file shared by every worker and CLI invocation. Each
//! collection is its own table with an `AUTOINCREMENT` id; jobs move between
//! tables, they are never updated in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use crate::error::{Result, StoreError};
use crate::ids::GapFill;
use crate::records::{
    Collection, CollectionRow, CompletedJob, FailedJob, NewJob, QueuedJob, Record, RunningJob,
    Stored,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        working_dir TEXT NOT NULL,
        absolute_path TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS running (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        working_dir TEXT NOT NULL,
        absolute_path TEXT NOT NULL,
        worker_identity TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS completed (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at TEXT NOT NULL,
        completed_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        working_dir TEXT NOT NULL,
        absolute_path TEXT NOT NULL,
        worker_identity TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS failed (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        failed_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        working_dir TEXT NOT NULL,
        absolute_path TEXT NOT NULL,
        worker_identity TEXT NOT NULL,
        failure_message TEXT NOT NULL
    );
";

/// How a batch insert assigns identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPolicy {
    /// Let the store auto-assign the next id in sequence
    #[default]
    Sequential,
    /// Take the smallest unused positive id in the target collection
    GapFill,
}

/// Row counts per collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Counts {
    pub fn get(&self, collection: Collection) -> usize {
        match collection {
            Collection::Queued => self.queued,
            Collection::Running => self.running,
            Collection::Completed => self.completed,
            Collection::Failed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed
    }
}

/// Handle on the shared job store
pub struct Store {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the store at `path`.
    ///
    /// Lock waits longer than `busy_timeout` fail with [`StoreError::StoreBusy`].
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        debug!("Opened job store at {}", path.display());
        Ok(store)
    }

    /// Private in-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, path: None };
        store.initialize()?;
        Ok(store)
    }

    /// Create the four tables if they do not exist yet
    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Database file backing this store, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All rows of a typed collection, lowest id first
    pub fn rows<T: CollectionRow>(&self) -> Result<Vec<Stored<T>>> {
        select_rows(&self.conn, "")
    }

    /// Lowest-id row of a typed collection
    pub fn first<T: CollectionRow>(&self) -> Result<Option<Stored<T>>> {
        select_first(&self.conn, "")
    }

    pub fn find<T: CollectionRow>(&self, id: i64) -> Result<Option<Stored<T>>> {
        find_row(&self.conn, id)
    }

    pub fn list(&self, collection: Collection) -> Result<Vec<Stored<Record>>> {
        Ok(match collection {
            Collection::Queued => erase(self.rows::<QueuedJob>()?),
            Collection::Running => erase(self.rows::<RunningJob>()?),
            Collection::Completed => erase(self.rows::<CompletedJob>()?),
            Collection::Failed => erase(self.rows::<FailedJob>()?),
        })
    }

    pub fn get_one(&self, collection: Collection) -> Result<Option<Stored<Record>>> {
        Ok(match collection {
            Collection::Queued => self.first::<QueuedJob>()?.map(|r| r.map(Record::Queued)),
            Collection::Running => self.first::<RunningJob>()?.map(|r| r.map(Record::Running)),
            Collection::Completed => {
                self.first::<CompletedJob>()?.map(|r| r.map(Record::Completed))
            }
            Collection::Failed => self.first::<FailedJob>()?.map(|r| r.map(Record::Failed)),
        })
    }

    /// Append a row with an auto-assigned id
    pub fn insert(&self, record: &Record) -> Result<i64> {
        insert_values(&self.conn, record.collection(), None, record.values())
    }

    /// Place a row at an explicit id; fails if the id is taken
    pub fn insert_with_id(&self, record: &Record, id: i64) -> Result<i64> {
        insert_values(&self.conn, record.collection(), Some(id), record.values())
    }

    /// Insert every record in one transaction; nothing is written unless all
    /// rows succeed.
    pub fn bulk_insert(&mut self, records: &[Record], policy: IdPolicy) -> Result<Vec<i64>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut allocators: HashMap<Collection, GapFill> = HashMap::new();
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            let collection = record.collection();
            let explicit = match policy {
                IdPolicy::Sequential => None,
                IdPolicy::GapFill => {
                    if !allocators.contains_key(&collection) {
                        allocators.insert(collection, GapFill::new(collection_ids(&tx, collection)?));
                    }
                    allocators.get_mut(&collection).map(GapFill::next_id)
                }
            };
            ids.push(insert_values(&tx, collection, explicit, record.values())?);
        }

        tx.commit()?;
        Ok(ids)
    }

    /// Add freshly discovered files to the queue as one batch
    pub fn enqueue(&mut self, jobs: Vec<NewJob>, policy: IdPolicy) -> Result<Vec<i64>> {
        let records: Vec<Record> = jobs
            .into_iter()
            .map(|job| Record::Queued(QueuedJob::new(job)))
            .collect();
        let ids = self.bulk_insert(&records, policy)?;
        info!("Enqueued {} job(s) ({:?} ids)", ids.len(), policy);
        Ok(ids)
    }

    /// Remove one row. Returns false when the row was already gone.
    pub fn delete(&self, collection: Collection, id: i64) -> Result<bool> {
        delete_row(&self.conn, collection, id)
    }

    /// Empty a collection and restart its id sequence at 1
    pub fn reset(&mut self, collection: Collection) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(&format!("DELETE FROM {}", collection.table()), [])?;
        tx.execute(
            "DELETE FROM sqlite_sequence WHERE name = ?1",
            [collection.table()],
        )?;
        tx.commit()?;
        info!("Reset {}: {} row(s) removed", collection, removed);
        Ok(())
    }

    pub fn counts(&self) -> Result<Counts> {
        let count = |c: Collection| -> Result<usize> {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", c.table()),
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };
        Ok(Counts {
            queued: count(Collection::Queued)?,
            running: count(Collection::Running)?,
            completed: count(Collection::Completed)?,
            failed: count(Collection::Failed)?,
        })
    }
}

fn erase<T: CollectionRow>(rows: Vec<Stored<T>>) -> Vec<Stored<Record>> {
    rows.into_iter()
        .map(|r| r.map(CollectionRow::into_record))
        .collect()
}

fn select_sql<T: CollectionRow>(filter: &str) -> String {
    format!(
        "SELECT id, {} FROM {} {} ORDER BY id ASC",
        T::COLUMNS.join(", "),
        T::COLLECTION.table(),
        filter
    )
}

pub(crate) fn select_rows<T: CollectionRow>(conn: &Connection, filter: &str) -> Result<Vec<Stored<T>>> {
    let mut stmt = conn.prepare(&select_sql::<T>(filter))?;
    let rows = stmt
        .query_map([], T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn select_first<T: CollectionRow>(
    conn: &Connection,
    filter: &str,
) -> Result<Option<Stored<T>>> {
    let sql = format!("{} LIMIT 1", select_sql::<T>(filter));
    Ok(conn.query_row(&sql, [], T::from_row).optional()?)
}

pub(crate) fn find_row<T: CollectionRow>(conn: &Connection, id: i64) -> Result<Option<Stored<T>>> {
    let sql = format!(
        "SELECT id, {} FROM {} WHERE id = ?1",
        T::COLUMNS.join(", "),
        T::COLLECTION.table()
    );
    Ok(conn.query_row(&sql, [id], T::from_row).optional()?)
}

pub(crate) fn insert_row<T: CollectionRow>(conn: &Connection, row: &T, id: Option<i64>) -> Result<i64> {
    insert_values(conn, T::COLLECTION, id, row.values())
}

fn insert_values(
    conn: &Connection,
    collection: Collection,
    id: Option<i64>,
    values: Vec<Value>,
) -> Result<i64> {
    let columns = collection.columns();
    let placeholders: Vec<String> = (1..=columns.len() + 1).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} (id, {}) VALUES ({})",
        collection.table(),
        columns.join(", "),
        placeholders.join(", ")
    );

    let id_value = id.map(Value::Integer).unwrap_or(Value::Null);
    conn.execute(&sql, params_from_iter(std::iter::once(id_value).chain(values)))?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn delete_row(conn: &Connection, collection: Collection, id: i64) -> Result<bool> {
    let affected = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", collection.table()),
        [id],
    )?;
    Ok(affected > 0)
}

pub(crate) fn collection_ids(conn: &Connection, collection: Collection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {} ORDER BY id", collection.table()))?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

pub(crate) fn is_constraint_violation(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Database(e) if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}
