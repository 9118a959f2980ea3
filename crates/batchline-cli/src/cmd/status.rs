//! Status subcommand: poll one job once

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color};

use batchline_batch::Tracker;
use batchline_core::{JobState, JobStatus};

use super::{Context, kv_table};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Provider job id (as printed by `submit` or `list`)
    pub job_id: String,
}

pub fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let provider = ctx.provider()?;
    let store = ctx.store()?;

    let (status, batch_name) = ctx.block_on(async {
        let mut tracker = Tracker::open(&provider, store, ctx.config.tracker_config())?;
        let status = tracker.poll(&args.job_id).await?;
        let batch_name = tracker.job(&args.job_id).map(|j| j.batch_name.clone());
        anyhow::Ok((status, batch_name))
    })?;

    ctx.report(
        || format_table(&args.job_id, batch_name.as_deref(), &status),
        || {
            log::info!(
                "{}: {} ({}/{}, {:.0}%)",
                args.job_id,
                status.state,
                status.completed_count,
                status.total_count,
                status.progress_percent()
            )
        },
    );
    Ok(())
}

fn state_color(state: JobState) -> Color {
    match state {
        JobState::Succeeded => Color::Green,
        JobState::Failed | JobState::Cancelled => Color::Red,
        JobState::Submitted | JobState::Running => Color::Yellow,
    }
}

fn format_table(job_id: &str, batch_name: Option<&str>, status: &JobStatus) -> String {
    let mut table = kv_table("Job");
    table.add_row(vec![Cell::new("Job id"), Cell::new(job_id)]);
    table.add_row(vec![
        Cell::new("Batch"),
        Cell::new(batch_name.unwrap_or("(not in ledger)")),
    ]);
    table.add_row(vec![
        Cell::new("State"),
        Cell::new(status.state).fg(state_color(status.state)),
    ]);
    table.add_row(vec![
        Cell::new("Progress"),
        Cell::new(format!(
            "{}/{} ({:.0}%)",
            status.completed_count,
            status.total_count,
            status.progress_percent()
        )),
    ]);
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    };
    table.add_row(vec![Cell::new("Created"), Cell::new(fmt_time(status.create_time))]);
    table.add_row(vec![Cell::new("Updated"), Cell::new(fmt_time(status.update_time))]);
    format!("\n{table}")
}
