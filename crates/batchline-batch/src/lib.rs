//! Batchline Batch - wave-based asynchronous batch submission
//!
//! Partitions work into capacity-bounded waves of batches, submits them to
//! the provider, tracks each job to a terminal state, and maps downloaded
//! results back to the original item ids.

pub mod batch;
pub mod ledger;
pub mod report;
pub mod retrieve;
pub mod scheduler;
pub mod store;
pub mod tracker;

// Re-exports
pub use batch::{Batch, IdMapping, Wave, batch_name, build_payload, partition};
pub use ledger::{LEDGER_FILE, Ledger, LedgerEntry};
pub use report::{BatchOutcome, BatchReport, RunReport, WaveReport};
pub use retrieve::{RetrieveError, RetrieveReport, parse_results, retrieve_results};
pub use scheduler::{SchedulerConfig, WaveScheduler};
pub use store::{BatchStore, JobRecord};
pub use tracker::{Job, Tracker, TrackerConfig, TrackerError, WaitOutcome};
