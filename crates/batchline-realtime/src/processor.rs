//! Resumable real-time processing under a per-invocation item quota.
//!
//! Items are classified one at a time through the [`Dispatcher`]. Progress
//! goes to the checkpoint every `checkpoint_every` items, right after any
//! failed item, and once more when the invocation ends for any reason.

use std::time::Duration;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use indicatif::ProgressBar;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use batchline_core::progress::{fmt_duration, fmt_num};
use batchline_core::{ConfigError, Dispatcher, ItemResult, Provider, WorkItem};

use crate::checkpoint::Checkpoint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Items attempted per invocation (successes and failures both count)
    pub items_per_day: usize,
    /// Save after this many items
    pub checkpoint_every: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            items_per_day: 400,
            checkpoint_every: 10,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.items_per_day == 0 {
            return Err(ConfigError("items_per_day must be > 0".into()));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError("checkpoint_every must be > 0".into()));
        }
        Ok(())
    }
}

/// Outcome of one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total_items: usize,
    pub processed_this_run: usize,
    pub failures_this_run: usize,
    pub total_processed: usize,
    pub remaining: usize,
    /// Stopped because the invocation quota was used up
    pub quota_reached: bool,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new("Real-time run")
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Value").fg(Color::Cyan),
            ]);
        table.add_row(vec![
            Cell::new("Processed this run"),
            Cell::new(fmt_num(self.processed_this_run)),
        ]);
        table.add_row(vec![
            Cell::new("Failures this run"),
            if self.failures_this_run > 0 {
                Cell::new(fmt_num(self.failures_this_run)).fg(Color::Red)
            } else {
                Cell::new("0")
            },
        ]);
        table.add_row(vec![
            Cell::new("Total processed").fg(Color::Green),
            Cell::new(format!(
                "{}/{}",
                fmt_num(self.total_processed),
                fmt_num(self.total_items)
            ))
            .fg(Color::Green),
        ]);
        table.add_row(vec![
            Cell::new("Remaining"),
            Cell::new(fmt_num(self.remaining)),
        ]);
        table.add_row(vec![
            Cell::new("Elapsed"),
            Cell::new(fmt_duration(self.elapsed)),
        ]);

        let mut out = format!("\n{table}");
        if self.quota_reached {
            out.push_str("\nQuota reached: run again to continue");
        } else if self.interrupted {
            out.push_str("\nInterrupted: progress saved, run again to continue");
        }
        out
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "Real-time run: {} processed ({} failed), {}/{} total, {} remaining [{}]{}",
            fmt_num(self.processed_this_run),
            fmt_num(self.failures_this_run),
            fmt_num(self.total_processed),
            fmt_num(self.total_items),
            fmt_num(self.remaining),
            fmt_duration(self.elapsed),
            if self.quota_reached {
                " (quota reached)"
            } else if self.interrupted {
                " (interrupted)"
            } else {
                ""
            }
        );
    }
}

pub struct Processor<'a, P> {
    provider: &'a P,
    dispatcher: &'a Dispatcher,
    config: ProcessorConfig,
    progress: ProgressBar,
}

impl<'a, P: Provider> Processor<'a, P> {
    pub fn new(
        provider: &'a P,
        dispatcher: &'a Dispatcher,
        config: ProcessorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            provider,
            dispatcher,
            config,
            progress: ProgressBar::hidden(),
        })
    }

    /// Report per-item progress on `pb` (length is set by `run`)
    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = pb;
        self
    }

    /// Process the items of `items` not yet in `checkpoint`, in input order.
    ///
    /// Per-item failures become error-tagged results and never stop the run.
    /// Errors only when the checkpoint can't be written.
    pub async fn run(
        &self,
        items: &[WorkItem],
        checkpoint: &mut Checkpoint,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunSummary> {
        let start = Instant::now();
        let pending = checkpoint.pending(items);
        let quota = self.config.items_per_day;
        log::info!(
            "{} of {} items pending, up to {} this run",
            fmt_num(pending.len()),
            fmt_num(items.len()),
            fmt_num(quota.min(pending.len()))
        );
        self.progress.set_length(quota.min(pending.len()) as u64);

        let mut summary = RunSummary {
            total_items: items.len(),
            ..Default::default()
        };
        let mut unsaved = 0usize;

        for item in pending {
            if summary.processed_this_run >= quota {
                log::warn!("Reached the limit of {quota} items for this run");
                summary.quota_reached = true;
                break;
            }
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let called = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.interrupted = true;
                    break;
                }
                r = self.dispatcher.dispatch(|| self.provider.call(item)) => r,
            };

            summary.processed_this_run += 1;
            unsaved += 1;
            self.progress.inc(1);
            match called {
                Ok(output) => {
                    checkpoint.record(ItemResult::output(&item.id, output));
                    if unsaved >= self.config.checkpoint_every {
                        checkpoint.save()?;
                        unsaved = 0;
                    }
                }
                Err(e) => {
                    log::warn!("{}: {e}", item.id);
                    summary.failures_this_run += 1;
                    checkpoint.record(ItemResult::error(&item.id, e.to_string()));
                    checkpoint.save()?;
                    unsaved = 0;
                }
            }
        }

        checkpoint.save()?;
        self.progress.finish_and_clear();

        summary.total_processed = checkpoint.len();
        summary.remaining = checkpoint.pending(items).len();
        summary.elapsed = start.elapsed();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use batchline_core::DispatcherConfig;
    use batchline_core::testing::ScriptedProvider;

    use super::*;

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("n{i}"), format!("t{i}"), "c"))
            .collect()
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(DispatcherConfig {
            max_concurrent: 4,
            min_interval: Duration::from_millis(10),
            call_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn zero_quota_rejected() {
        let provider = ScriptedProvider::new();
        let d = dispatcher();
        let config = ProcessorConfig {
            items_per_day: 0,
            ..Default::default()
        };
        assert!(Processor::new(&provider, &d, config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_become_placeholders_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut cp = Checkpoint::load(&dir.path().join("cp.json")).unwrap();
        let provider = ScriptedProvider::new().with_failing_ids(&["n1", "n3"]);
        let d = dispatcher();
        let processor = Processor::new(&provider, &d, ProcessorConfig::default()).unwrap();

        let summary = processor
            .run(&items(5), &mut cp, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.processed_this_run, 5);
        assert_eq!(summary.failures_this_run, 2);
        assert!(summary.is_complete());
        assert!(cp.results()[1].is_error());
        assert!(!cp.results()[2].is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut cp = Checkpoint::load(&dir.path().join("cp.json")).unwrap();
        let provider = ScriptedProvider::new().with_slow_ids(&["n0"], Duration::from_secs(60));
        let d = dispatcher();
        let processor = Processor::new(&provider, &d, ProcessorConfig::default()).unwrap();

        let summary = processor
            .run(&items(2), &mut cp, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.failures_this_run, 1);
        let first = &cp.results()[0];
        assert_eq!(
            first,
            &ItemResult::error("n0", "exceeded timeout of 5.0s")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completed_checkpoint_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let provider = ScriptedProvider::new();
        let d = dispatcher();
        let processor = Processor::new(&provider, &d, ProcessorConfig::default()).unwrap();
        let items = items(20);

        let mut cp = Checkpoint::load(&path).unwrap();
        processor.run(&items, &mut cp, &CancellationToken::new()).await.unwrap();
        assert_eq!(provider.calls().len(), 20);

        let mut cp = Checkpoint::load(&path).unwrap();
        let summary = processor
            .run(&items, &mut cp, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.processed_this_run, 0);
        assert_eq!(summary.total_processed, 20);
        assert_eq!(provider.calls().len(), 20);
    }
}
