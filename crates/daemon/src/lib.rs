pub mod config;
pub mod error;
pub mod ids;
pub mod records;
pub mod store;
pub mod claim;
pub mod outcome;
pub mod retry;
pub mod scan;
pub mod transcoder;
pub mod worker;

pub use config::QueueConfig;
pub use error::StoreError;
pub use records::{Collection, CompletedJob, FailedJob, NewJob, QueuedJob, Record, RunningJob, Stored};
pub use store::{Counts, IdPolicy, Store};
pub use transcoder::{CommandTranscoder, TranscodeOutcome, Transcoder};
pub use worker::{BackoffPolicy, StepOutcome, Worker};
