//! Requeueing of running and failed jobs.
//!
//! Retried jobs re-enter the queue as if freshly discovered (new
//! `created_at`), but at the smallest free queue ids, so they are claimed
//! ahead of jobs appended later.

use log::{debug, info, warn};
use rusqlite::TransactionBehavior;

use crate::error::{Result, StoreError};
use crate::ids::GapFill;
use crate::records::{Collection, CollectionRow, FailedJob, NewJob, QueuedJob, RunningJob, Stored};
use crate::store::{collection_ids, delete_row, insert_row, is_constraint_violation, Store};

impl Store {
    /// Requeue every row of `source` (running or failed). Returns how many
    /// jobs went back into the queue.
    ///
    /// Each job moves in its own transaction: if the call fails partway, the
    /// jobs already moved stay queued and the rest stay where they were.
    pub fn retry(&mut self, source: Collection) -> Result<usize> {
        let jobs = self.retry_candidates(source)?;
        if jobs.is_empty() {
            return Err(StoreError::EmptySource(source));
        }

        let mut ids = GapFill::new(collection_ids(&self.conn, Collection::Queued)?);
        let mut requeued = 0;
        for (source_id, job) in jobs {
            if self.requeue(source, source_id, job, &mut ids)?.is_some() {
                requeued += 1;
            }
        }

        info!("Requeued {} job(s) from {}", requeued, source);
        Ok(requeued)
    }

    /// Requeue a single running or failed row. Returns its new queue id.
    pub fn retry_one(&mut self, source: Collection, id: i64) -> Result<i64> {
        let job = match source {
            Collection::Running => self.find::<RunningJob>(id)?.map(|r| r.record.job()),
            Collection::Failed => self.find::<FailedJob>(id)?.map(|r| r.record.job()),
            other => return Err(StoreError::InvalidRetrySource(other)),
        }
        .ok_or(StoreError::RecordNotFound { collection: source, id })?;

        let mut ids = GapFill::new(collection_ids(&self.conn, Collection::Queued)?);
        let queue_id = self
            .requeue(source, id, job, &mut ids)?
            .ok_or(StoreError::RecordNotFound { collection: source, id })?;

        info!("Requeued {} #{} as queue #{}", source, id, queue_id);
        Ok(queue_id)
    }

    fn retry_candidates(&self, source: Collection) -> Result<Vec<(i64, NewJob)>> {
        fn jobs<T: CollectionRow>(rows: Vec<Stored<T>>) -> Vec<(i64, NewJob)> {
            rows.into_iter().map(|r| (r.id, r.record.job())).collect()
        }

        match source {
            Collection::Running => Ok(jobs(self.rows::<RunningJob>()?)),
            Collection::Failed => Ok(jobs(self.rows::<FailedJob>()?)),
            other => Err(StoreError::InvalidRetrySource(other)),
        }
    }

    /// Move one source row into the queue at the next gap-fill id.
    ///
    /// Returns `None` when the source row disappeared before the move, e.g. a
    /// worker recorded its outcome in the meantime.
    fn requeue(
        &mut self,
        source: Collection,
        source_id: i64,
        job: NewJob,
        ids: &mut GapFill,
    ) -> Result<Option<i64>> {
        let queued = QueuedJob::new(job);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !delete_row(&tx, source, source_id)? {
            debug!("{} #{} already gone, skipping", source, source_id);
            return Ok(None);
        }

        let mut queue_id = ids.next_id();
        loop {
            match insert_row(&tx, &queued, Some(queue_id)) {
                Ok(_) => break,
                Err(e) if is_constraint_violation(&e) => {
                    // the set is stale; under the write lock a reload is exact
                    warn!("Queue id {} taken concurrently, reloading", queue_id);
                    *ids = GapFill::new(collection_ids(&tx, Collection::Queued)?);
                    queue_id = ids.next_id();
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit()?;
        debug!(
            "{} #{} -> queue #{}: {}",
            source,
            source_id,
            queue_id,
            queued.absolute_path.display()
        );
        Ok(Some(queue_id))
    }
}
