//! Per-batch, per-wave and per-run submission reports

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use batchline_core::JobState;
use batchline_core::progress::fmt_num;

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Submitted {
        job_id: String,
        /// Job id taken from the ledger instead of a new submission
        reattached: bool,
        /// Last known state when the run ended
        state: JobState,
    },
    /// Submission rejected or retries exhausted; the batch was skipped
    SubmitFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub wave: usize,
    pub batch_num: usize,
    pub batch_name: String,
    pub item_count: usize,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn job_id(&self) -> Option<&str> {
        match &self.outcome {
            BatchOutcome::Submitted { job_id, .. } => Some(job_id),
            BatchOutcome::SubmitFailed(_) => None,
        }
    }

    pub fn state(&self) -> Option<JobState> {
        match &self.outcome {
            BatchOutcome::Submitted { state, .. } => Some(*state),
            BatchOutcome::SubmitFailed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveReport {
    pub wave: usize,
    pub batches: Vec<BatchReport>,
}

impl WaveReport {
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(|b| b.item_count).sum()
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.batches
            .iter()
            .filter_map(|b| b.job_id().map(str::to_string))
            .collect()
    }

    pub fn failed_submissions(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| matches!(b.outcome, BatchOutcome::SubmitFailed(_)))
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub run_name: String,
    pub waves: Vec<WaveReport>,
    /// Cancelled before every batch was submitted (or gated)
    pub interrupted: bool,
}

impl RunReport {
    pub fn batches(&self) -> impl Iterator<Item = &BatchReport> {
        self.waves.iter().flat_map(|w| w.batches.iter())
    }

    /// Jobs that exist on the provider side (new or re-attached)
    pub fn submitted(&self) -> usize {
        self.batches().filter(|b| b.job_id().is_some()).count()
    }

    pub fn reattached(&self) -> usize {
        self.batches()
            .filter(|b| matches!(b.outcome, BatchOutcome::Submitted { reattached: true, .. }))
            .count()
    }

    pub fn failed_submissions(&self) -> usize {
        self.waves.iter().map(WaveReport::failed_submissions).sum()
    }

    pub fn count_state(&self, state: JobState) -> usize {
        self.batches().filter(|b| b.state() == Some(state)).count()
    }

    pub fn items_submitted(&self) -> usize {
        self.batches()
            .filter(|b| b.job_id().is_some())
            .map(|b| b.item_count)
            .sum()
    }

    /// No interruption, no skipped batch, no job known to have failed
    pub fn is_success(&self) -> bool {
        !self.interrupted
            && self.failed_submissions() == 0
            && self.count_state(JobState::Failed) == 0
            && self.count_state(JobState::Cancelled) == 0
    }

    /// Format summary table as a string.
    pub fn format_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![
                Cell::new(format!("Run: {}", self.run_name))
                    .fg(Color::Cyan)
                    .add_attribute(comfy_table::Attribute::Bold),
                Cell::new("Items").fg(Color::Cyan),
                Cell::new("Batches").fg(Color::Cyan),
                Cell::new("Succeeded").fg(Color::Cyan),
                Cell::new("Failed").fg(Color::Cyan),
                Cell::new("Pending").fg(Color::Cyan),
                Cell::new("Not submitted").fg(Color::Cyan),
            ]);

        for wave in &self.waves {
            let state_count = |s: JobState| wave.batches.iter().filter(|b| b.state() == Some(s)).count();
            let failed = state_count(JobState::Failed) + state_count(JobState::Cancelled);
            let pending = state_count(JobState::Submitted) + state_count(JobState::Running);
            let skipped = wave.failed_submissions();
            table.add_row(vec![
                Cell::new(format!("Wave {}", wave.wave)),
                Cell::new(fmt_num(wave.item_count())),
                Cell::new(wave.batches.len()),
                Cell::new(state_count(JobState::Succeeded)).fg(Color::Green),
                if failed > 0 {
                    Cell::new(failed).fg(Color::Red)
                } else {
                    Cell::new(failed)
                },
                Cell::new(pending),
                if skipped > 0 {
                    Cell::new(skipped).fg(Color::Red)
                } else {
                    Cell::new(skipped)
                },
            ]);
        }

        let mut out = format!("\n{table}");
        if self.interrupted {
            out.push_str("\nInterrupted: remaining batches were not submitted");
        }
        out
    }

    /// Log minimal summary (non-TTY mode).
    pub fn log(&self) {
        log::info!(
            "{}: {} jobs ({} re-attached) for {} items in {} waves; {} succeeded, {} failed, {} not submitted{}",
            self.run_name,
            self.submitted(),
            self.reattached(),
            fmt_num(self.items_submitted()),
            self.waves.len(),
            self.count_state(JobState::Succeeded),
            self.count_state(JobState::Failed) + self.count_state(JobState::Cancelled),
            self.failed_submissions(),
            if self.interrupted { " (interrupted)" } else { "" }
        );
    }
}
