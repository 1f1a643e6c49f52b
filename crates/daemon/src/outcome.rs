use chrono::Utc;
use log::info;
use rusqlite::{Transaction, TransactionBehavior};

use crate::error::{Result, StoreError};
use crate::records::{Collection, CompletedJob, FailedJob, RunningJob, Stored};
use crate::store::{delete_row, find_row, insert_row, Store};

impl Store {
    /// Move a running job into completed. `started_at` and `created_at` are
    /// carried over unchanged.
    pub fn complete(&mut self, running_id: i64) -> Result<Stored<CompletedJob>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let running = take_running(&tx, running_id)?;

        let completed = CompletedJob {
            started_at: running.started_at,
            completed_at: Utc::now(),
            created_at: running.created_at,
            working_dir: running.working_dir,
            absolute_path: running.absolute_path,
            worker_identity: running.worker_identity,
        };
        let id = insert_row(&tx, &completed, None)?;
        tx.commit()?;

        info!(
            "Running #{} completed as #{}: {}",
            running_id,
            id,
            completed.absolute_path.display()
        );
        Ok(Stored { id, record: completed })
    }

    /// Move a running job into failed, keeping `message` verbatim
    pub fn fail(&mut self, running_id: i64, message: &str) -> Result<Stored<FailedJob>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let running = take_running(&tx, running_id)?;

        let failed = FailedJob {
            failed_at: Utc::now(),
            created_at: running.created_at,
            working_dir: running.working_dir,
            absolute_path: running.absolute_path,
            worker_identity: running.worker_identity,
            failure_message: message.to_string(),
        };
        let id = insert_row(&tx, &failed, None)?;
        tx.commit()?;

        info!(
            "Running #{} failed as #{}: {}: {}",
            running_id,
            id,
            failed.absolute_path.display(),
            message
        );
        Ok(Stored { id, record: failed })
    }
}

/// Read and delete a running row inside `tx`
fn take_running(tx: &Transaction<'_>, running_id: i64) -> Result<RunningJob> {
    let row = find_row::<RunningJob>(tx, running_id)?.ok_or(StoreError::RecordNotFound {
        collection: Collection::Running,
        id: running_id,
    })?;
    delete_row(tx, Collection::Running, running_id)?;
    Ok(row.record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::queued;
    use crate::store::IdPolicy;
    use std::path::PathBuf;

    fn store_with_running() -> (Store, Stored<RunningJob>) {
        let mut store = Store::open_in_memory().unwrap();
        store
            .enqueue(vec![queued("/videos", "a.mp4")], IdPolicy::Sequential)
            .unwrap();
        let job = store.claim("host-a").unwrap();
        (store, job)
    }

    #[test]
    fn test_complete_preserves_lineage() {
        let (mut store, job) = store_with_running();

        let done = store.complete(job.id).unwrap();
        assert_eq!(done.record.created_at, job.record.created_at);
        assert_eq!(done.record.started_at, job.record.started_at);
        assert!(done.record.completed_at >= done.record.started_at);
        assert_eq!(done.record.worker_identity, "host-a");

        // round trip through storage keeps the exact timestamps
        let stored = store.find::<CompletedJob>(done.id).unwrap().unwrap();
        assert_eq!(stored, done);

        let counts = store.counts().unwrap();
        assert_eq!(counts.running, 0);
        assert_eq!(counts.completed, 1);
    }

    #[test]
    fn test_fail_stores_message() {
        let (mut store, job) = store_with_running();

        let failed = store.fail(job.id, "unsupported codec").unwrap();
        assert_eq!(failed.record.failure_message, "unsupported codec");
        assert_eq!(failed.record.created_at, job.record.created_at);
        assert_eq!(failed.record.absolute_path, PathBuf::from("/videos/a.mp4"));

        let counts = store.counts().unwrap();
        assert_eq!(counts.running, 0);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_missing_running_row() {
        let (mut store, job) = store_with_running();
        store.delete(Collection::Running, job.id).unwrap();

        let err = store.complete(job.id).unwrap_err();
        assert!(matches!(
            err,
            StoreError::RecordNotFound { collection: Collection::Running, id } if id == job.id
        ));
        let err = store.fail(job.id, "late").unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound { .. }));
        assert_eq!(store.counts().unwrap().total(), 0);
    }

    #[test]
    fn test_outcome_recorded_once() {
        let (mut store, job) = store_with_running();
        store.complete(job.id).unwrap();
        assert!(matches!(
            store.fail(job.id, "double").unwrap_err(),
            StoreError::RecordNotFound { .. }
        ));
        let counts = store.counts().unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 0);
    }
}
