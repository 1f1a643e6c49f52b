use rusqlite::ErrorCode;
use thiserror::Error;

use crate::records::Collection;

/// Errors raised by the job store and the engines built on top of it
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown collection `{0}` (expected queue, running, completed or failed)")]
    UnknownCollection(String),

    /// Nothing to claim. Expected and non-fatal; workers back off.
    #[error("queue is empty")]
    QueueEmpty,

    #[error("nothing to retry: {0} is empty")]
    EmptySource(Collection),

    #[error("cannot retry from {0}; only running and failed jobs can be requeued")]
    InvalidRetrySource(Collection),

    #[error("{collection} row {id} not found")]
    RecordNotFound { collection: Collection, id: i64 },

    #[error("store is busy (lock wait timed out)")]
    StoreBusy,

    #[error("claim failed: {0}")]
    ClaimFailed(String),

    #[error("store is corrupt: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => StoreError::StoreBusy,
            Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
                StoreError::Corrupt(e.to_string())
            }
            _ => match e {
                rusqlite::Error::FromSqlConversionFailure(col, _, inner) => {
                    StoreError::Corrupt(format!("column {}: {}", col, inner))
                }
                other => StoreError::Database(other),
            },
        }
    }
}

impl StoreError {
    /// Conditions a caller should simply retry after backing off
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::QueueEmpty | StoreError::StoreBusy)
    }

    /// Conditions that should take a worker process down
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupt(_) | StoreError::Database(_) | StoreError::Io(_)
        )
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_maps_to_store_busy() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err = StoreError::from(err);
        assert!(matches!(err, StoreError::StoreBusy));
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_locked_maps_to_store_busy() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            None,
        );
        assert!(matches!(StoreError::from(err), StoreError::StoreBusy));
    }

    #[test]
    fn test_corruption_is_fatal() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            None,
        );
        let err = StoreError::from(err);
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_operator_errors_are_neither() {
        let err = StoreError::EmptySource(Collection::Failed);
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "nothing to retry: failed is empty");
    }
}
