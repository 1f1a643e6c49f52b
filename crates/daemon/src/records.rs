//! Row types for the four job collections.
//!
//! Every collection has its own struct and a [`CollectionRow`] impl that ties
//! the struct to its table, so typed store operations are checked at compile
//! time. [`Record`] erases the type for operator-facing commands that pick a
//! collection at runtime.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// The four job collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Queued,
    Running,
    Completed,
    Failed,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Queued,
        Collection::Running,
        Collection::Completed,
        Collection::Failed,
    ];

    /// SQLite table backing this collection
    pub fn table(self) -> &'static str {
        match self {
            Collection::Queued => "queue",
            Collection::Running => "running",
            Collection::Completed => "completed",
            Collection::Failed => "failed",
        }
    }

    /// Column names after `id`, in storage order
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Collection::Queued => QueuedJob::COLUMNS,
            Collection::Running => RunningJob::COLUMNS,
            Collection::Completed => CompletedJob::COLUMNS,
            Collection::Failed => FailedJob::COLUMNS,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queue" | "queued" => Ok(Collection::Queued),
            "running" => Ok(Collection::Running),
            "completed" => Ok(Collection::Completed),
            "failed" => Ok(Collection::Failed),
            _ => Err(StoreError::UnknownCollection(s.to_string())),
        }
    }
}

/// A row as persisted: the store-assigned id plus the record body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: i64,
    #[serde(flatten)]
    pub record: T,
}

impl<T> Stored<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Stored<U> {
        Stored { id: self.id, record: f(self.record) }
    }
}

/// A file discovered by enumeration, not yet in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub working_dir: PathBuf,
    pub absolute_path: PathBuf,
}

impl NewJob {
    pub fn new(working_dir: impl Into<PathBuf>, absolute_path: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            absolute_path: absolute_path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub created_at: DateTime<Utc>,
    pub working_dir: PathBuf,
    pub absolute_path: PathBuf,
}

impl QueuedJob {
    /// A queue entry created now
    pub fn new(job: NewJob) -> Self {
        Self {
            created_at: Utc::now(),
            working_dir: job.working_dir,
            absolute_path: job.absolute_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningJob {
    pub started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub working_dir: PathBuf,
    pub absolute_path: PathBuf,
    pub worker_identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedJob {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub working_dir: PathBuf,
    pub absolute_path: PathBuf,
    pub worker_identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    pub failed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub working_dir: PathBuf,
    pub absolute_path: PathBuf,
    pub worker_identity: String,
    pub failure_message: String,
}

/// Binds a row struct to its table.
///
/// `from_row` reads a row selected as `id, COLUMNS...`; `values` yields the
/// bind values for `COLUMNS` in the same order.
pub trait CollectionRow: Sized {
    const COLLECTION: Collection;
    const COLUMNS: &'static [&'static str];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>>;
    fn values(&self) -> Vec<Value>;
    fn into_record(self) -> Record;

    /// Working directory and path, the identity-relevant fields of a job
    fn job(&self) -> NewJob;
}

impl CollectionRow for QueuedJob {
    const COLLECTION: Collection = Collection::Queued;
    const COLUMNS: &'static [&'static str] = &["created_at", "working_dir", "absolute_path"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored {
            id: row.get(0)?,
            record: QueuedJob {
                created_at: read_timestamp(row, 1)?,
                working_dir: read_path(row, 2)?,
                absolute_path: read_path(row, 3)?,
            },
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            timestamp_value(&self.created_at),
            path_value(&self.working_dir),
            path_value(&self.absolute_path),
        ]
    }

    fn into_record(self) -> Record {
        Record::Queued(self)
    }

    fn job(&self) -> NewJob {
        NewJob::new(self.working_dir.clone(), self.absolute_path.clone())
    }
}

impl CollectionRow for RunningJob {
    const COLLECTION: Collection = Collection::Running;
    const COLUMNS: &'static [&'static str] = &[
        "started_at",
        "created_at",
        "working_dir",
        "absolute_path",
        "worker_identity",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored {
            id: row.get(0)?,
            record: RunningJob {
                started_at: read_timestamp(row, 1)?,
                created_at: read_timestamp(row, 2)?,
                working_dir: read_path(row, 3)?,
                absolute_path: read_path(row, 4)?,
                worker_identity: row.get(5)?,
            },
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            timestamp_value(&self.started_at),
            timestamp_value(&self.created_at),
            path_value(&self.working_dir),
            path_value(&self.absolute_path),
            Value::Text(self.worker_identity.clone()),
        ]
    }

    fn into_record(self) -> Record {
        Record::Running(self)
    }

    fn job(&self) -> NewJob {
        NewJob::new(self.working_dir.clone(), self.absolute_path.clone())
    }
}

impl CollectionRow for CompletedJob {
    const COLLECTION: Collection = Collection::Completed;
    const COLUMNS: &'static [&'static str] = &[
        "started_at",
        "completed_at",
        "created_at",
        "working_dir",
        "absolute_path",
        "worker_identity",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored {
            id: row.get(0)?,
            record: CompletedJob {
                started_at: read_timestamp(row, 1)?,
                completed_at: read_timestamp(row, 2)?,
                created_at: read_timestamp(row, 3)?,
                working_dir: read_path(row, 4)?,
                absolute_path: read_path(row, 5)?,
                worker_identity: row.get(6)?,
            },
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            timestamp_value(&self.started_at),
            timestamp_value(&self.completed_at),
            timestamp_value(&self.created_at),
            path_value(&self.working_dir),
            path_value(&self.absolute_path),
            Value::Text(self.worker_identity.clone()),
        ]
    }

    fn into_record(self) -> Record {
        Record::Completed(self)
    }

    fn job(&self) -> NewJob {
        NewJob::new(self.working_dir.clone(), self.absolute_path.clone())
    }
}

impl CollectionRow for FailedJob {
    const COLLECTION: Collection = Collection::Failed;
    const COLUMNS: &'static [&'static str] = &[
        "failed_at",
        "created_at",
        "working_dir",
        "absolute_path",
        "worker_identity",
        "failure_message",
    ];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored {
            id: row.get(0)?,
            record: FailedJob {
                failed_at: read_timestamp(row, 1)?,
                created_at: read_timestamp(row, 2)?,
                working_dir: read_path(row, 3)?,
                absolute_path: read_path(row, 4)?,
                worker_identity: row.get(5)?,
                failure_message: row.get(6)?,
            },
        })
    }

    fn values(&self) -> Vec<Value> {
        vec![
            timestamp_value(&self.failed_at),
            timestamp_value(&self.created_at),
            path_value(&self.working_dir),
            path_value(&self.absolute_path),
            Value::Text(self.worker_identity.clone()),
            Value::Text(self.failure_message.clone()),
        ]
    }

    fn into_record(self) -> Record {
        Record::Failed(self)
    }

    fn job(&self) -> NewJob {
        NewJob::new(self.working_dir.clone(), self.absolute_path.clone())
    }
}

/// A row of any collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "lowercase")]
pub enum Record {
    Queued(QueuedJob),
    Running(RunningJob),
    Completed(CompletedJob),
    Failed(FailedJob),
}

impl Record {
    pub fn collection(&self) -> Collection {
        match self {
            Record::Queued(_) => Collection::Queued,
            Record::Running(_) => Collection::Running,
            Record::Completed(_) => Collection::Completed,
            Record::Failed(_) => Collection::Failed,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        match self {
            Record::Queued(r) => r.values(),
            Record::Running(r) => r.values(),
            Record::Completed(r) => r.values(),
            Record::Failed(r) => r.values(),
        }
    }

    pub fn absolute_path(&self) -> &std::path::Path {
        match self {
            Record::Queued(r) => &r.absolute_path,
            Record::Running(r) => &r.absolute_path,
            Record::Completed(r) => &r.absolute_path,
            Record::Failed(r) => &r.absolute_path,
        }
    }

    /// Column values rendered for display, in storage order
    pub fn fields(&self) -> Vec<String> {
        self.values()
            .into_iter()
            .map(|v| match v {
                Value::Text(s) => s,
                Value::Integer(i) => i.to_string(),
                Value::Real(f) => f.to_string(),
                Value::Null => String::new(),
                Value::Blob(b) => format!("<{} bytes>", b.len()),
            })
            .collect()
    }
}

impl Stored<Record> {
    /// `id|field|field|...`, the line format of `cavtc show`
    pub fn to_line(&self) -> String {
        let mut parts = vec![self.id.to_string()];
        parts.extend(self.record.fields());
        parts.join("|")
    }
}

fn timestamp_value(ts: &DateTime<Utc>) -> Value {
    Value::Text(ts.to_rfc3339())
}

fn path_value(path: &std::path::Path) -> Value {
    Value::Text(path.to_string_lossy().into_owned())
}

fn read_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn read_path(row: &Row<'_>, idx: usize) -> rusqlite::Result<PathBuf> {
    row.get::<_, String>(idx).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_parse() {
        assert_eq!("queue".parse::<Collection>().unwrap(), Collection::Queued);
        assert_eq!("queued".parse::<Collection>().unwrap(), Collection::Queued);
        assert_eq!("Running".parse::<Collection>().unwrap(), Collection::Running);
        assert_eq!("completed".parse::<Collection>().unwrap(), Collection::Completed);
        assert_eq!("failed".parse::<Collection>().unwrap(), Collection::Failed);
    }

    #[test]
    fn test_unknown_collection() {
        let err = "sqlite_sequence".parse::<Collection>().unwrap_err();
        assert!(matches!(err, StoreError::UnknownCollection(name) if name == "sqlite_sequence"));
    }

    #[test]
    fn test_display_is_table_name() {
        for c in Collection::ALL {
            assert_eq!(c.to_string().parse::<Collection>().unwrap(), c);
        }
        assert_eq!(Collection::Queued.to_string(), "queue");
    }

    #[test]
    fn test_columns_match_values() {
        let now = Utc::now();
        let failed = FailedJob {
            failed_at: now,
            created_at: now,
            working_dir: PathBuf::from("/videos"),
            absolute_path: PathBuf::from("/videos/a.mp4"),
            worker_identity: "host-a".to_string(),
            failure_message: "unsupported codec".to_string(),
        };
        assert_eq!(failed.values().len(), FailedJob::COLUMNS.len());
        assert_eq!(Collection::Failed.columns(), FailedJob::COLUMNS);
        assert_eq!(Collection::Queued.columns().len(), 3);
    }

    #[test]
    fn test_to_line() {
        let created = DateTime::parse_from_rfc3339("2025-01-02T03:04:05+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let row = Stored {
            id: 7,
            record: Record::Queued(QueuedJob {
                created_at: created,
                working_dir: PathBuf::from("/videos"),
                absolute_path: PathBuf::from("/videos/a.mp4"),
            }),
        };
        assert_eq!(
            row.to_line(),
            "7|2025-01-02T03:04:05+00:00|/videos|/videos/a.mp4"
        );
    }

    #[test]
    fn test_record_serializes_with_collection_tag() {
        let record = Record::Queued(QueuedJob::new(NewJob::new("/videos", "/videos/a.mp4")));
        let json = serde_json::to_value(Stored { id: 1, record }).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["collection"], "queued");
        assert_eq!(json["absolute_path"], "/videos/a.mp4");
    }
}
