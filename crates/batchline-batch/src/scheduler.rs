//! Wave scheduler: partition, submit batch by batch, gate between waves.
//!
//! Within a wave batches are submitted one after another with a fixed delay.
//! Quota errors wait out a fixed backoff and retry the same batch; a batch
//! that still can't be submitted is recorded and skipped. With wave gating
//! on, wave *k+1* is released only once every job of wave *k* is terminal.

use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use batchline_core::progress::fmt_num;
use batchline_core::{ConfigError, JobState, Provider, RetryPolicy, WorkItem, retry_with_backoff};

use crate::batch::{Batch, Wave, batch_name, build_payload, partition};
use crate::ledger::LedgerEntry;
use crate::report::{BatchOutcome, BatchReport, RunReport, WaveReport};
use crate::tracker::Tracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_items_per_wave: usize,
    pub max_batch_size: usize,
    /// Poll each wave to completion before submitting the next
    pub wait_for_waves: bool,
    /// Pause between consecutive submissions
    pub submit_delay: Duration,
    /// Quota backoff and submit attempts per batch
    pub retry: RetryPolicy,
    /// Interval between gating polls
    pub poll_interval: Duration,
}

impl SchedulerConfig {
    /// Sizing from a capacity plan, timing defaults otherwise
    pub fn new(max_items_per_wave: usize, max_batch_size: usize) -> Self {
        Self {
            max_items_per_wave,
            max_batch_size,
            wait_for_waves: true,
            submit_delay: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_items_per_wave == 0 {
            return Err(ConfigError("max_items_per_wave must be > 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError("max_batch_size must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError("max_submit_attempts must be > 0".into()));
        }
        Ok(())
    }
}

pub struct WaveScheduler<'t, 'p, P> {
    tracker: &'t mut Tracker<'p, P>,
    config: SchedulerConfig,
}

impl<'t, 'p, P: Provider> WaveScheduler<'t, 'p, P> {
    pub fn new(tracker: &'t mut Tracker<'p, P>, config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { tracker, config })
    }

    /// Submit `items` as run `run_name`.
    ///
    /// Errors only on local storage failures; provider failures end up in
    /// the report. On cancellation, submission stops and the partial report
    /// is returned with remote jobs left running.
    pub async fn run(
        &mut self,
        run_name: &str,
        items: &[WorkItem],
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunReport> {
        let waves = partition(items, self.config.max_items_per_wave, self.config.max_batch_size);
        log::info!(
            "{run_name}: {} items in {} waves ({} batches)",
            fmt_num(items.len()),
            waves.len(),
            waves.iter().map(|w| w.batches.len()).sum::<usize>()
        );

        let mut report = RunReport {
            run_name: run_name.to_string(),
            ..Default::default()
        };
        let mut submitted_any = false;

        for (idx, wave) in waves.iter().enumerate() {
            let wave_report = self
                .submit_wave(run_name, wave, cancel, &mut submitted_any)
                .await?;
            let job_ids = wave_report.job_ids();
            let complete = wave_report.batches.len() == wave.batches.len();
            report.waves.push(wave_report);
            if !complete || cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let is_last = idx + 1 == waves.len();
            if self.config.wait_for_waves && !is_last && !job_ids.is_empty() {
                log::info!("Wave {}: waiting for {} jobs before next wave", wave.wave, job_ids.len());
                if !self
                    .tracker
                    .wait_all(&job_ids, self.config.poll_interval, cancel)
                    .await
                {
                    report.interrupted = true;
                    break;
                }
                log::info!("Wave {} complete", wave.wave);
            }
        }

        // Final known state of every job
        for batch in report.waves.iter_mut().flat_map(|w| w.batches.iter_mut()) {
            if let BatchOutcome::Submitted { job_id, state, .. } = &mut batch.outcome {
                if let Some(known) = self.tracker.state(job_id) {
                    *state = known;
                }
            }
        }
        Ok(report)
    }

    /// Submit every batch of one wave; stops early on cancellation
    async fn submit_wave(
        &mut self,
        run_name: &str,
        wave: &Wave<'_>,
        cancel: &CancellationToken,
        submitted_any: &mut bool,
    ) -> anyhow::Result<WaveReport> {
        let mut report = WaveReport {
            wave: wave.wave,
            batches: Vec::with_capacity(wave.batches.len()),
        };
        for batch in &wave.batches {
            if cancel.is_cancelled() {
                break;
            }
            let name = batch_name(run_name, batch.wave, batch.batch_num);

            let outcome = match self.reattachable(&name, batch) {
                Some(entry) => {
                    log::info!("{name}: re-attaching to {} ({})", entry.job_id, entry.status);
                    self.tracker.attach(&entry);
                    BatchOutcome::Submitted {
                        job_id: entry.job_id,
                        reattached: true,
                        state: entry.status,
                    }
                }
                None => {
                    if *submitted_any {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.config.submit_delay) => {}
                        }
                    }
                    *submitted_any = true;
                    self.submit_batch(&name, batch, cancel).await?
                }
            };
            report.batches.push(BatchReport {
                wave: batch.wave,
                batch_num: batch.batch_num,
                batch_name: name,
                item_count: batch.items.len(),
                outcome,
            });
        }
        Ok(report)
    }

    /// Ledger entry for this exact batch from an earlier run under the same
    /// name: same position, same size and the same item ids in the same order.
    fn reattachable(&self, name: &str, batch: &Batch<'_>) -> Option<LedgerEntry> {
        let entry = self.tracker.ledger().find(name)?;
        if entry.wave != batch.wave
            || entry.batch_num != batch.batch_num
            || entry.item_count != batch.items.len()
        {
            log::warn!(
                "{name}: ledger entry has {} items, batch has {}; submitting fresh",
                entry.item_count,
                batch.items.len()
            );
            return None;
        }

        let stored = match self.tracker.store().load_mapping(name) {
            Ok(mapping) => mapping,
            Err(e) => {
                log::warn!("{name}: no usable id mapping ({e:#}); submitting fresh");
                return None;
            }
        };
        let expected = match build_payload(batch) {
            Ok((_, mapping)) => mapping,
            Err(e) => {
                log::warn!("{name}: cannot encode batch ({e}); submitting fresh");
                return None;
            }
        };
        if stored != expected {
            log::warn!(
                "{name}: {} holds different items than this batch; submitting fresh",
                entry.job_id
            );
            return None;
        }
        Some(entry.clone())
    }

    async fn submit_batch(
        &mut self,
        name: &str,
        batch: &Batch<'_>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<BatchOutcome> {
        let (payload, mapping) =
            build_payload(batch).with_context(|| format!("Cannot encode {name}"))?;

        let provider = self.tracker.provider();
        let submitted = retry_with_backoff(name, &self.config.retry, cancel, || {
            provider.submit(name, payload.clone())
        })
        .await;

        match submitted {
            Ok(job_id) => {
                // Input and mapping land only with an accepted job, so a stored
                // mapping always describes the job the ledger names
                let batch_file = self.tracker.store().write_input(name, &payload, &mapping)?;
                self.tracker
                    .record_submission(&job_id, name, batch, batch_file)?;
                log::info!(
                    "{name}: submitted {} items as {job_id}",
                    fmt_num(batch.items.len())
                );
                Ok(BatchOutcome::Submitted {
                    job_id,
                    reattached: false,
                    state: JobState::Submitted,
                })
            }
            Err(e) => {
                log::error!("{name}: submission failed, skipping batch: {e}");
                Ok(BatchOutcome::SubmitFailed(e.to_string()))
            }
        }
    }
}
