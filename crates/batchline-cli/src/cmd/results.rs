//! Results subcommand: download a finished job and map results to item ids

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use comfy_table::{Cell, Color};

use batchline_batch::{RetrieveReport, retrieve_results};
use batchline_core::progress::fmt_num;
use batchline_core::write_json_atomic;

use super::{Context, kv_table};

#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Provider job id
    pub job_id: String,

    /// Batch name the job was submitted as
    pub batch_name: String,

    /// Where to write the parsed results (default: <batch_dir>/<batch>_parsed.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: ResultsArgs, ctx: &Context) -> Result<()> {
    let provider = ctx.provider()?;
    let store = ctx.store()?;

    let report = ctx
        .block_on(retrieve_results(&provider, &store, &args.job_id, &args.batch_name))
        .with_context(|| format!("Cannot retrieve results of {}", args.job_id))?;

    let output = args
        .output
        .unwrap_or_else(|| store.dir().join(format!("{}_parsed.json", args.batch_name)));
    write_json_atomic(&output, &report.results)?;

    ctx.report(
        || format_table(&args.batch_name, &report, &output),
        || {
            log::info!(
                "{}: {} results ({} errors, {} skipped lines) -> {}",
                args.batch_name,
                fmt_num(report.results.len()),
                fmt_num(report.error_count()),
                fmt_num(report.malformed + report.unmapped),
                output.display()
            )
        },
    );
    Ok(())
}

fn format_table(batch_name: &str, report: &RetrieveReport, output: &std::path::Path) -> String {
    let mut table = kv_table(batch_name);
    table.add_row(vec![
        Cell::new("Results").fg(Color::Green),
        Cell::new(fmt_num(report.results.len())).fg(Color::Green),
    ]);
    let errors = report.error_count();
    table.add_row(vec![
        Cell::new("Item errors"),
        if errors > 0 {
            Cell::new(fmt_num(errors)).fg(Color::Red)
        } else {
            Cell::new("0")
        },
    ]);
    table.add_row(vec![
        Cell::new("Malformed lines"),
        Cell::new(fmt_num(report.malformed)),
    ]);
    table.add_row(vec![
        Cell::new("Unknown ids"),
        Cell::new(fmt_num(report.unmapped)),
    ]);
    table.add_row(vec![
        Cell::new("Output"),
        Cell::new(output.display().to_string()),
    ]);
    format!("\n{table}")
}
