//! The worker loop: claim a job, hand it to the transcoder, record the outcome.
//!
//! A worker is either idle (no job held) or processing exactly one job. When
//! the queue is empty it sleeps a randomized backoff so that many workers
//! sharing one store do not poll in lockstep. Jobs held by a worker that dies
//! stay in `running` until an operator retries them.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::Rng;
use sysinfo::System;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::records::{RunningJob, Stored};
use crate::store::Store;
use crate::transcoder::{TranscodeOutcome, Transcoder};

/// Uniform random delay between `min` and `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Always the same delay; handy in tests
    pub fn fixed(delay: Duration) -> Self {
        Self { min: delay, max: delay }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let (lo, hi) = (self.min.as_millis() as u64, self.max.as_millis() as u64);
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// What a single worker step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing claimed (empty queue or store busy)
    Idle,
    Completed { running_id: i64, path: PathBuf },
    Failed { running_id: i64, path: PathBuf, message: String },
    /// The job was retried out from under this worker before its outcome
    /// could be recorded
    Lost { running_id: i64, path: PathBuf },
}

/// Host name of this machine, or a random label if it has none
pub fn default_identity() -> String {
    System::host_name()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()))
}

pub struct Worker<T> {
    store: Store,
    transcoder: T,
    identity: String,
    backoff: BackoffPolicy,
}

impl<T: Transcoder> Worker<T> {
    pub fn new(store: Store, transcoder: T, identity: impl Into<String>, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            transcoder,
            identity: identity.into(),
            backoff,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// One idle → processing → idle cycle
    ///
    /// Store calls block the calling thread for up to the busy timeout. A
    /// worker owns its runtime, so nothing else is starved by them.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        let job = match self.store.claim(&self.identity) {
            Ok(job) => job,
            Err(StoreError::QueueEmpty) => return Ok(StepOutcome::Idle),
            Err(StoreError::StoreBusy) => {
                debug!("Store busy while claiming, backing off");
                return Ok(StepOutcome::Idle);
            }
            Err(e) => return Err(e),
        };

        info!(
            "Processing running #{}: {}",
            job.id,
            job.record.absolute_path.display()
        );
        let outcome = self
            .transcoder
            .transcode(&job.record.absolute_path, &job.record.working_dir)
            .await;

        self.record(job, outcome).await
    }

    /// Loop forever. Returns only on a fatal store error.
    pub async fn run(&mut self) -> Result<()> {
        info!("Worker {} started", self.identity);
        loop {
            match self.step().await {
                Ok(StepOutcome::Idle) => {
                    let delay = self.backoff.next_delay();
                    debug!("Queue empty, sleeping {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!("Worker {} stopping: {}", self.identity, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Worker {}: {}", self.identity, e);
                    tokio::time::sleep(self.backoff.next_delay()).await;
                }
            }
        }
    }

    async fn record(&mut self, job: Stored<RunningJob>, outcome: TranscodeOutcome) -> Result<StepOutcome> {
        let running_id = job.id;
        let path = job.record.absolute_path;

        loop {
            let result = match &outcome {
                TranscodeOutcome::Success => self.store.complete(running_id).map(|_| ()),
                TranscodeOutcome::Failure(message) => self.store.fail(running_id, message).map(|_| ()),
            };

            match result {
                Ok(()) => break,
                // the transcode already happened; keep trying to record it
                Err(StoreError::StoreBusy) => {
                    warn!("Store busy recording running #{}, retrying", running_id);
                    tokio::time::sleep(self.backoff.next_delay()).await;
                }
                Err(StoreError::RecordNotFound { .. }) => {
                    warn!(
                        "Running #{} was requeued while processing, dropping outcome: {}",
                        running_id,
                        path.display()
                    );
                    return Ok(StepOutcome::Lost { running_id, path });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(match outcome {
            TranscodeOutcome::Success => {
                info!("Job {} completed: {}", running_id, path.display());
                StepOutcome::Completed { running_id, path }
            }
            TranscodeOutcome::Failure(message) => {
                warn!("Job {} failed: {}: {}", running_id, path.display(), message);
                StepOutcome::Failed { running_id, path, message }
            }
        })
    }
}
