//! Batchline Realtime - resumable real-time classification
//!
//! Drives items one at a time through the rate-limited dispatcher under a
//! per-invocation quota, checkpointing results so a later invocation picks
//! up where the previous one stopped.

pub mod checkpoint;
pub mod processor;

// Re-exports
pub use checkpoint::Checkpoint;
pub use processor::{Processor, ProcessorConfig, RunSummary};
