//! In-memory provider for tests.
//!
//! Jobs advance through a per-batch script of states, one step per poll.
//! Output artifacts are synthesized from the submitted request lines unless
//! a test sets one explicitly.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::ProviderError;
use crate::item::WorkItem;
use crate::provider::{JobState, JobStatus, Provider};

struct ScriptedJob {
    batch_name: String,
    payload: Vec<u8>,
    script: VecDeque<JobState>,
    state: JobState,
    hidden_polls: usize,
}

#[derive(Default)]
struct State {
    next_job: usize,
    jobs: FxHashMap<String, ScriptedJob>,
    submitted: Vec<(String, String)>,
    submit_attempts: usize,
    submit_failures: VecDeque<ProviderError>,
    poll_failures: VecDeque<ProviderError>,
    scripts: FxHashMap<String, Vec<JobState>>,
    default_script: Vec<JobState>,
    hidden_polls: usize,
    outputs: FxHashMap<String, Vec<u8>>,
    failing_ids: FxHashSet<String>,
    slow_ids: FxHashSet<String>,
    call_delay: Duration,
    calls: Vec<String>,
}

pub struct ScriptedProvider {
    state: Mutex<State>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// Every job goes RUNNING then SUCCEEDED unless scripted otherwise
    pub fn new() -> Self {
        let state = State {
            default_script: vec![JobState::Running, JobState::Succeeded],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// States observed by successive polls of every job
    pub fn with_default_script(self, states: &[JobState]) -> Self {
        self.lock().default_script = states.to_vec();
        self
    }

    /// States observed by successive polls of the job submitted as `batch_name`
    pub fn with_script(self, batch_name: &str, states: &[JobState]) -> Self {
        self.lock()
            .scripts
            .insert(batch_name.to_string(), states.to_vec());
        self
    }

    /// Next submits fail with these errors, in order
    pub fn with_submit_failures(self, errors: Vec<ProviderError>) -> Self {
        self.lock().submit_failures.extend(errors);
        self
    }

    /// Next polls fail with these errors, in order
    pub fn with_poll_failures(self, errors: Vec<ProviderError>) -> Self {
        self.lock().poll_failures.extend(errors);
        self
    }

    /// New jobs answer NotFound for their first `n` polls
    pub fn with_hidden_polls(self, n: usize) -> Self {
        self.lock().hidden_polls = n;
        self
    }

    /// Explicit output artifact for the job submitted as `batch_name`
    pub fn with_output(self, batch_name: &str, artifact: impl Into<Vec<u8>>) -> Self {
        self.lock()
            .outputs
            .insert(batch_name.to_string(), artifact.into());
        self
    }

    /// Real-time calls for these ids fail with an HTTP 500
    pub fn with_failing_ids(self, ids: &[&str]) -> Self {
        self.lock()
            .failing_ids
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    /// Real-time calls for these ids sleep `delay` before answering
    pub fn with_slow_ids(self, ids: &[&str], delay: Duration) -> Self {
        let mut state = self.lock();
        state.slow_ids.extend(ids.iter().map(|s| s.to_string()));
        state.call_delay = delay;
        drop(state);
        self
    }

    /// Register a job as if it had been submitted by an earlier process
    pub fn insert_job(&self, job_id: &str, batch_name: &str, payload: Vec<u8>) {
        let mut state = self.lock();
        let script = state
            .scripts
            .get(batch_name)
            .unwrap_or(&state.default_script)
            .clone();
        state.jobs.insert(
            job_id.to_string(),
            ScriptedJob {
                batch_name: batch_name.to_string(),
                payload,
                script: script.into(),
                state: JobState::Submitted,
                hidden_polls: 0,
            },
        );
    }

    /// `(batch_name, job_id)` of accepted submissions, in order
    pub fn submitted_batches(&self) -> Vec<(String, String)> {
        self.lock().submitted.clone()
    }

    /// Submit attempts including rejected ones
    pub fn submit_attempts(&self) -> usize {
        self.lock().submit_attempts
    }

    pub fn submit_count(&self) -> usize {
        self.lock().submitted.len()
    }

    /// Item ids passed to `call`, in start order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Payload submitted for `job_id`
    pub fn payload(&self, job_id: &str) -> Option<Vec<u8>> {
        self.lock().jobs.get(job_id).map(|j| j.payload.clone())
    }
}

/// One `{custom_id, response}` line per request line
fn synthesize_output(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for line in payload.split(|&b| b == b'\n') {
        let Ok(req) = serde_json::from_slice::<serde_json::Value>(line) else {
            continue;
        };
        let record = serde_json::json!({
            "custom_id": req["custom_id"],
            "response": { "label": "ok", "title": req["title"] },
        });
        out.extend_from_slice(record.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

fn count_lines(payload: &[u8]) -> u64 {
    payload
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .count() as u64
}

impl Provider for ScriptedProvider {
    async fn submit(&self, batch_name: &str, payload: Vec<u8>) -> Result<String, ProviderError> {
        let mut state = self.lock();
        state.submit_attempts += 1;
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        state.next_job += 1;
        let job_id = format!("batches/job-{:03}", state.next_job);
        let script = state
            .scripts
            .get(batch_name)
            .unwrap_or(&state.default_script)
            .clone();
        let hidden_polls = state.hidden_polls;
        state.jobs.insert(
            job_id.clone(),
            ScriptedJob {
                batch_name: batch_name.to_string(),
                payload,
                script: script.into(),
                state: JobState::Submitted,
                hidden_polls,
            },
        );
        state
            .submitted
            .push((batch_name.to_string(), job_id.clone()));
        Ok(job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, ProviderError> {
        let mut state = self.lock();
        if let Some(err) = state.poll_failures.pop_front() {
            return Err(err);
        }
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ProviderError::NotFound(job_id.to_string()))?;
        if job.hidden_polls > 0 {
            job.hidden_polls -= 1;
            return Err(ProviderError::NotFound(job_id.to_string()));
        }
        if let Some(next) = job.script.pop_front() {
            job.state = next;
        }
        let total = count_lines(&job.payload);
        Ok(JobStatus {
            state: job.state,
            completed_count: if job.state == JobState::Succeeded { total } else { 0 },
            total_count: total,
            create_time: None,
            update_time: None,
        })
    }

    async fn retrieve(&self, job_id: &str) -> Result<Vec<u8>, ProviderError> {
        let state = self.lock();
        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| ProviderError::NotFound(job_id.to_string()))?;
        Ok(match state.outputs.get(&job.batch_name) {
            Some(artifact) => artifact.clone(),
            None => synthesize_output(&job.payload),
        })
    }

    async fn call(&self, item: &WorkItem) -> Result<serde_json::Value, ProviderError> {
        let (fail, delay) = {
            let mut state = self.lock();
            state.calls.push(item.id.clone());
            let delay = state
                .slow_ids
                .contains(&item.id)
                .then_some(state.call_delay);
            (state.failing_ids.contains(&item.id), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(ProviderError::Http {
                status: Some(500),
                message: format!("scripted failure for {}", item.id),
            });
        }
        Ok(serde_json::json!({ "label": "ok", "title": item.title }))
    }
}
