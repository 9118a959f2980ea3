//! Submit subcommand: partition items into waves and submit them as batch jobs

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use batchline_batch::{BatchOutcome, RunReport, Tracker, WaitOutcome, WaveScheduler};
use batchline_core::{JobState, Provider, estimate, load_items};

use super::Context;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// JSON array of work items
    pub items: PathBuf,

    /// Wait for every submitted job to finish
    #[arg(long)]
    pub wait: bool,

    /// Seconds between status polls while waiting
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Submit all waves without waiting for the previous wave to finish
    #[arg(long)]
    pub no_wave_gating: bool,

    /// Run name, prefix of every batch name (default: batch_<timestamp>)
    #[arg(long)]
    pub name: Option<String>,
}

fn default_run_name() -> String {
    format!("batch_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"))
}

pub fn run(args: SubmitArgs, ctx: &Context) -> Result<()> {
    let items = load_items(&args.items)?;
    let plan = estimate(items.len(), &ctx.config.capacity)?;
    plan.log();

    let mut sched = ctx.config.scheduler_config(plan.max_items_per_wave);
    if args.no_wave_gating {
        sched.wait_for_waves = false;
    }
    if let Some(secs) = args.poll_interval {
        sched.poll_interval = Duration::from_secs(secs);
    }
    let wait_interval = Duration::from_secs(
        args.poll_interval
            .unwrap_or(ctx.config.scheduler.wait_poll_interval_secs),
    );
    let max_wait = Duration::from_secs(ctx.config.scheduler.max_wait_secs);

    let provider = ctx.provider()?;
    let store = ctx.store()?;
    let run_name = args.name.unwrap_or_else(default_run_name);
    log::info!("Run {run_name}: {} items", items.len());
    let line = ctx.progress.stage_line("submit");
    line.set_message(format!(
        "{run_name}: {} items in {} waves",
        items.len(),
        plan.num_waves
    ));

    let result = ctx.block_on(async {
        let mut tracker = Tracker::open(&provider, store, ctx.config.tracker_config())?;
        let mut report = WaveScheduler::new(&mut tracker, sched)?
            .run(&run_name, &items, &ctx.cancel)
            .await?;

        let mut all_succeeded = true;
        if args.wait && !report.interrupted {
            all_succeeded =
                wait_for_jobs(&mut tracker, &mut report, wait_interval, max_wait, &ctx.cancel)
                    .await;
        }
        anyhow::Ok((report, all_succeeded))
    });
    line.finish_and_clear();
    let (report, all_succeeded) = result?;

    ctx.report(|| report.format_table(), || report.log());

    if report.interrupted {
        anyhow::bail!("Run {run_name} interrupted; re-run with --name {run_name} to resume");
    }
    if !report.is_success() || !all_succeeded {
        anyhow::bail!(
            "Run {run_name} finished with failures ({} batches not submitted, {} jobs failed)",
            report.failed_submissions(),
            report.count_state(JobState::Failed) + report.count_state(JobState::Cancelled)
        );
    }
    Ok(())
}

/// Wait on each submitted job in turn, updating its reported state.
/// `true` only if every job ended SUCCEEDED.
async fn wait_for_jobs<P: Provider>(
    tracker: &mut Tracker<'_, P>,
    report: &mut RunReport,
    interval: Duration,
    max_wait: Duration,
    cancel: &CancellationToken,
) -> bool {
    let mut all_succeeded = true;
    for batch in report.waves.iter_mut().flat_map(|w| w.batches.iter_mut()) {
        let BatchOutcome::Submitted { job_id, state, .. } = &mut batch.outcome else {
            all_succeeded = false;
            continue;
        };
        if state.is_terminal() {
            all_succeeded &= *state == JobState::Succeeded;
            continue;
        }
        match tracker.wait(job_id, interval, max_wait, cancel).await {
            Ok(outcome) => {
                *state = outcome.state();
                if !outcome.succeeded() {
                    log::warn!("{}: {outcome}", batch.batch_name);
                    all_succeeded = false;
                }
                if matches!(outcome, WaitOutcome::Interrupted(_)) {
                    report.interrupted = true;
                    return false;
                }
            }
            Err(e) => {
                log::error!("{}: {e}", batch.batch_name);
                all_succeeded = false;
            }
        }
    }
    all_succeeded
}
