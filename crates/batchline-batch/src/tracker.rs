//! Job lifecycle tracking.
//!
//! `SUBMITTED → RUNNING → {SUCCEEDED | FAILED | CANCELLED}`. Only SUBMITTED
//! is assigned locally; every later state comes from a provider poll and is
//! applied monotonically. Each applied change refreshes the ledger entry and
//! the job metadata file.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use rustc_hash::FxHashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use batchline_core::{JobState, JobStatus, Provider, ProviderError};

use crate::batch::Batch;
use crate::ledger::{Ledger, LedgerEntry};
use crate::store::{BatchStore, JobRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long after submission a NotFound still reads as SUBMITTED
    pub not_found_grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            not_found_grace: Duration::from_secs(120),
        }
    }
}

#[derive(Debug)]
pub enum TrackerError {
    Provider(ProviderError),
    /// Provider doesn't know the job and the grace period is over
    NotFound(String),
    Storage(anyhow::Error),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(e) => write!(f, "{e}"),
            Self::NotFound(id) => write!(f, "job not found: {id}"),
            Self::Storage(e) => write!(f, "storage error: {e:#}"),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<ProviderError> for TrackerError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

impl TrackerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::NotFound(_) | Self::Storage(_) => false,
        }
    }
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Job reached a terminal state
    Finished(JobState),
    /// Deadline passed; the remote job is left as is
    TimedOut(JobState),
    /// Cancellation token fired
    Interrupted(JobState),
}

impl WaitOutcome {
    pub fn succeeded(self) -> bool {
        self == Self::Finished(JobState::Succeeded)
    }

    /// Last known job state
    pub fn state(self) -> JobState {
        match self {
            Self::Finished(s) | Self::TimedOut(s) | Self::Interrupted(s) => s,
        }
    }
}

impl std::fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished(s) => write!(f, "finished as {s}"),
            Self::TimedOut(s) => write!(f, "timed out while {s}"),
            Self::Interrupted(s) => write!(f, "interrupted while {s}"),
        }
    }
}

/// A job known to this tracker
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub batch_name: String,
    pub state: JobState,
    pub last_status: Option<JobStatus>,
    grace_until: Instant,
}

impl Job {
    /// Apply an observed state; returns whether it moved the job forward
    fn apply(&mut self, observed: JobState) -> bool {
        if self.state.can_advance_to(observed) {
            self.state = observed;
            true
        } else {
            false
        }
    }
}

pub struct Tracker<'p, P> {
    provider: &'p P,
    store: BatchStore,
    ledger: Ledger,
    jobs: FxHashMap<String, Job>,
    config: TrackerConfig,
}

impl<'p, P: Provider> Tracker<'p, P> {
    /// Tracker over `store`, loading its ledger
    pub fn open(provider: &'p P, store: BatchStore, config: TrackerConfig) -> anyhow::Result<Self> {
        let ledger = Ledger::load(&store.ledger_path())?;
        Ok(Self {
            provider,
            store,
            ledger,
            jobs: FxHashMap::default(),
            config,
        })
    }

    pub fn provider(&self) -> &'p P {
        self.provider
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub fn state(&self, job_id: &str) -> Option<JobState> {
        self.jobs.get(job_id).map(|j| j.state)
    }

    /// Record a successful submission: metadata file, ledger entry, then
    /// local SUBMITTED state.
    pub fn record_submission(
        &mut self,
        job_id: &str,
        batch_name: &str,
        batch: &Batch<'_>,
        batch_file: PathBuf,
    ) -> anyhow::Result<()> {
        let submitted_at = Utc::now();
        self.store.save_job(&JobRecord {
            job_id: job_id.to_string(),
            batch_name: batch_name.to_string(),
            batch_file,
            submitted_at,
            status: JobState::Submitted,
        })?;
        self.ledger.append(LedgerEntry {
            wave: batch.wave,
            batch_num: batch.batch_num,
            batch_name: batch_name.to_string(),
            job_id: job_id.to_string(),
            item_count: batch.items.len(),
            submitted_at,
            status: JobState::Submitted,
        })?;
        self.jobs.insert(
            job_id.to_string(),
            Job {
                job_id: job_id.to_string(),
                batch_name: batch_name.to_string(),
                state: JobState::Submitted,
                last_status: None,
                grace_until: Instant::now() + self.config.not_found_grace,
            },
        );
        Ok(())
    }

    /// Track a job submitted earlier (ledger entry from a previous process).
    ///
    /// The not-found grace runs from the recorded submission time.
    pub fn attach(&mut self, entry: &LedgerEntry) {
        let age = (Utc::now() - entry.submitted_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = self.config.not_found_grace.saturating_sub(age);
        self.jobs.insert(
            entry.job_id.clone(),
            Job {
                job_id: entry.job_id.clone(),
                batch_name: entry.batch_name.clone(),
                state: entry.status,
                last_status: None,
                grace_until: Instant::now() + remaining,
            },
        );
    }

    /// One provider poll, applied to the tracked job if any.
    ///
    /// A stale observation (older than the known state) is reported with the
    /// known state instead.
    pub async fn poll(&mut self, job_id: &str) -> Result<JobStatus, TrackerError> {
        if !self.jobs.contains_key(job_id) {
            if let Some(entry) = self.ledger.find_job(job_id).cloned() {
                self.attach(&entry);
            }
        }

        let polled = self.provider.poll(job_id).await;
        match polled {
            Ok(status) => self.observe(job_id, status),
            Err(ProviderError::NotFound(_)) => match self.jobs.get(job_id) {
                Some(job) if Instant::now() < job.grace_until => {
                    log::debug!("{}: not visible yet, treating as SUBMITTED", job.batch_name);
                    Ok(JobStatus {
                        state: job.state,
                        ..JobStatus::submitted()
                    })
                }
                _ => Err(TrackerError::NotFound(job_id.to_string())),
            },
            Err(e) => Err(TrackerError::Provider(e)),
        }
    }

    fn observe(&mut self, job_id: &str, mut status: JobStatus) -> Result<JobStatus, TrackerError> {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return Ok(status);
        };
        let previous = job.state;
        if job.apply(status.state) {
            log::info!("{}: {previous} -> {}", job.batch_name, job.state);
            self.ledger
                .update_status(job_id, job.state)
                .map_err(TrackerError::Storage)?;
            self.store
                .update_job_status(&job.batch_name, job.state)
                .map_err(TrackerError::Storage)?;
        } else if status.state != job.state {
            log::debug!(
                "{}: ignoring stale state {} (already {})",
                job.batch_name,
                status.state,
                job.state
            );
            status.state = job.state;
        }
        job.last_status = Some(status.clone());
        Ok(status)
    }

    /// Poll every `poll_interval` until terminal, `max_wait` elapses, or
    /// `cancel` fires.
    ///
    /// Transient poll errors are logged and the loop goes on; a terminal
    /// error (not found after grace, storage) ends the wait.
    pub async fn wait(
        &mut self,
        job_id: &str,
        poll_interval: Duration,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome, TrackerError> {
        let deadline = Instant::now() + max_wait;
        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = self.state(job_id).unwrap_or(JobState::Submitted);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(WaitOutcome::Interrupted(last)),
                _ = tokio::time::sleep_until(deadline) => {
                    log::warn!("{job_id}: still {last} after {}s", max_wait.as_secs());
                    return Ok(WaitOutcome::TimedOut(last));
                }
                _ = ticker.tick() => {}
            }

            match self.poll(job_id).await {
                Ok(status) if status.state.is_terminal() => {
                    return Ok(WaitOutcome::Finished(status.state));
                }
                Ok(status) => {
                    last = status.state;
                    log::info!(
                        "{job_id}: {} ({}/{}, {:.0}%)",
                        status.state,
                        status.completed_count,
                        status.total_count,
                        status.progress_percent()
                    );
                }
                Err(e) if e.is_retryable() => log::warn!("{job_id}: poll failed: {e}, retrying"),
                Err(e) => return Err(e),
            }
        }
    }

    /// `true` only if the job ends SUCCEEDED; FAILED, CANCELLED, timeout and
    /// poll errors all yield `false`.
    pub async fn wait_for_completion(
        &mut self,
        job_id: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> bool {
        match self
            .wait(job_id, poll_interval, max_wait, &CancellationToken::new())
            .await
        {
            Ok(outcome) if outcome.succeeded() => true,
            Ok(outcome) => {
                log::warn!("{job_id}: {outcome}");
                false
            }
            Err(e) => {
                log::error!("{job_id}: {e}");
                false
            }
        }
    }

    /// Poll `job_ids` together until every one is terminal.
    ///
    /// Jobs that can no longer be polled (not found after grace) stop being
    /// waited on. Returns `false` if cancelled first.
    pub async fn wait_all(
        &mut self,
        job_ids: &[String],
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let total = job_ids.len();
        let mut pending: Vec<&str> = job_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !self.state(id).is_some_and(JobState::is_terminal))
            .collect();
        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !pending.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = ticker.tick() => {}
            }
            let mut still = Vec::with_capacity(pending.len());
            for id in pending {
                match self.poll(id).await {
                    Ok(status) if status.state.is_terminal() => {}
                    Ok(_) => still.push(id),
                    Err(e) if e.is_retryable() => {
                        log::warn!("{id}: poll failed: {e}, retrying");
                        still.push(id);
                    }
                    Err(e) => log::error!("{id}: {e}, no longer waiting on it"),
                }
            }
            log::info!("{}/{total} jobs settled", total - still.len());
            pending = still;
        }
        true
    }
}
