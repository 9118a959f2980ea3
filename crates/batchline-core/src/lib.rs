//! Batchline Core - shared infrastructure for batch and real-time inference
//!
//! Work items, the provider boundary (trait + HTTP adapter), capacity
//! planning, the rate-limited dispatcher, retry, persistence helpers,
//! logging and progress reporting.

pub mod capacity;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod item;
pub mod logging;
pub mod persist;
pub mod progress;
pub mod provider;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenience
pub use capacity::{CapacityConfig, CapacityPlan, CostProjection, Pricing, Tier, estimate};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{ConfigError, ProviderError};
pub use http::HttpProvider;
pub use item::{ItemResult, Outcome, WorkItem, load_items, sort_by_input_order, validate_items};
pub use logging::{IndicatifLogger, init_logging};
pub use persist::{read_json, read_json_opt, write_atomic, write_json_atomic};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use provider::{JobState, JobStatus, Provider};
pub use retry::{RetryPolicy, retry_with_backoff};
