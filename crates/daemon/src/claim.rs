use chrono::Utc;
use log::{debug, info};
use rusqlite::TransactionBehavior;

use crate::error::{Result, StoreError};
use crate::records::{Collection, QueuedJob, RunningJob, Stored};
use crate::store::{delete_row, insert_row, select_first, Store};

impl Store {
    /// Move the lowest-id queued job into running, attributed to `worker_identity`.
    ///
    /// The whole move happens under the database write lock, so two workers
    /// can never walk away with the same queued row. Fails with
    /// [`StoreError::QueueEmpty`] when there is nothing to claim; nothing is
    /// written in that case.
    pub fn claim(&mut self, worker_identity: &str) -> Result<Stored<RunningJob>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let queued = match select_first::<QueuedJob>(&tx, "")? {
            Some(row) => row,
            None => {
                debug!("Nothing queued for {}", worker_identity);
                return Err(StoreError::QueueEmpty);
            }
        };

        let running = RunningJob {
            started_at: Utc::now(),
            created_at: queued.record.created_at,
            working_dir: queued.record.working_dir,
            absolute_path: queued.record.absolute_path,
            worker_identity: worker_identity.to_string(),
        };
        let running_id = insert_row(&tx, &running, None)?;

        if !delete_row(&tx, Collection::Queued, queued.id)? {
            // dropping tx rolls the insert back
            return Err(StoreError::ClaimFailed(format!(
                "queue row {} vanished during claim",
                queued.id
            )));
        }

        tx.commit()?;
        info!(
            "{} claimed queue #{} as running #{}: {}",
            worker_identity,
            queued.id,
            running_id,
            running.absolute_path.display()
        );

        Ok(Stored {
            id: running_id,
            record: running,
        })
    }
}
