//! Inference provider boundary.
//!
//! Everything the scheduler, tracker and real-time processor know about the
//! provider goes through [`Provider`]. The HTTP adapter lives in
//! [`crate::http`]; tests use [`crate::testing::ScriptedProvider`].

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::item::WorkItem;

/// Provider-side state of one batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Position in the lifecycle; terminal states share the top rank
    fn rank(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Whether moving from `self` to `next` goes forward.
    ///
    /// Terminal states never change, so a late or stale observation
    /// cannot move a job backwards.
    pub fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Parse provider state names (`JOB_STATE_*` or bare)
    pub fn from_name(s: &str) -> Option<Self> {
        let bare = s.strip_prefix("JOB_STATE_").unwrap_or(s);
        match bare.to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" | "SUBMITTED" => Some(Self::Submitted),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One poll result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub completed_count: u64,
    pub total_count: u64,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl JobStatus {
    /// Placeholder for a job the provider doesn't show yet
    pub fn submitted() -> Self {
        Self {
            state: JobState::Submitted,
            completed_count: 0,
            total_count: 0,
            create_time: None,
            update_time: None,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_count > 0 {
            self.completed_count as f64 / self.total_count as f64 * 100.0
        } else {
            0.0
        }
    }
}

/// Contract with the external inference provider.
///
/// Methods return `Send` futures so callers can drive them from spawned
/// tasks and `select!` loops.
pub trait Provider: Send + Sync {
    /// Submit one batch (JSONL request records); returns the job id
    fn submit(
        &self,
        batch_name: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;

    fn poll(&self, job_id: &str) -> impl Future<Output = Result<JobStatus, ProviderError>> + Send;

    /// Raw output artifact (line records); only valid once SUCCEEDED
    fn retrieve(&self, job_id: &str) -> impl Future<Output = Result<Vec<u8>, ProviderError>> + Send;

    /// Real-time classification of a single item
    fn call(
        &self,
        item: &WorkItem,
    ) -> impl Future<Output = Result<serde_json::Value, ProviderError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_accepts_provider_prefix() {
        assert_eq!(JobState::from_name("JOB_STATE_PENDING"), Some(JobState::Submitted));
        assert_eq!(JobState::from_name("JOB_STATE_RUNNING"), Some(JobState::Running));
        assert_eq!(JobState::from_name("JOB_STATE_SUCCEEDED"), Some(JobState::Succeeded));
        assert_eq!(JobState::from_name("failed"), Some(JobState::Failed));
        assert_eq!(JobState::from_name("CANCELED"), Some(JobState::Cancelled));
        assert_eq!(JobState::from_name("JOB_STATE_PAUSED"), None);
    }

    #[test]
    fn transitions_are_monotonic() {
        use JobState::*;
        assert!(Submitted.can_advance_to(Running));
        assert!(Submitted.can_advance_to(Failed));
        assert!(Running.can_advance_to(Succeeded));
        assert!(!Running.can_advance_to(Submitted));
        assert!(!Running.can_advance_to(Running));
        assert!(!Succeeded.can_advance_to(Failed));
        assert!(!Cancelled.can_advance_to(Running));
    }

    #[test]
    fn serde_uses_upper_names() {
        assert_eq!(serde_json::to_string(&JobState::Cancelled).unwrap(), "\"CANCELLED\"");
        let s: JobState = serde_json::from_str("\"RUNNING\"").unwrap();
        assert_eq!(s, JobState::Running);
    }

    #[test]
    fn progress_percent_handles_zero_total() {
        assert_eq!(JobStatus::submitted().progress_percent(), 0.0);
        let status = JobStatus {
            completed_count: 25,
            total_count: 100,
            ..JobStatus::submitted()
        };
        assert_eq!(status.progress_percent(), 25.0);
    }
}
