//! Realtime subcommand: resumable per-item calls under a daily quota

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use batchline_core::{Dispatcher, load_items, sort_by_input_order, write_json_atomic};
use batchline_realtime::{Checkpoint, Processor};

use super::Context;

#[derive(Args, Debug)]
pub struct RealtimeArgs {
    /// JSON array of work items
    pub items: PathBuf,

    /// Checkpoint file (default: <batch_dir>/<items stem>_checkpoint.json)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Items to process in this invocation
    #[arg(long)]
    pub items_per_day: Option<usize>,

    /// Write all results in input order here once every item is processed
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

fn default_checkpoint(batch_dir: &Path, items: &Path) -> PathBuf {
    let stem = items
        .file_stem()
        .map_or_else(|| "items".into(), |s| s.to_string_lossy());
    batch_dir.join(format!("{stem}_checkpoint.json"))
}

pub fn run(args: RealtimeArgs, ctx: &Context) -> Result<()> {
    let items = load_items(&args.items)?;
    let mut config = ctx.config.processor_config();
    if let Some(n) = args.items_per_day {
        config.items_per_day = n;
    }
    let checkpoint_path = args
        .checkpoint
        .unwrap_or_else(|| default_checkpoint(&ctx.config.output.batch_dir, &args.items));

    let provider = ctx.provider()?;
    let dispatcher = Dispatcher::new(ctx.config.dispatcher_config())?;
    let mut checkpoint = Checkpoint::load(&checkpoint_path)?;
    if !checkpoint.is_empty() {
        log::info!(
            "Resuming from {} ({} items done)",
            checkpoint_path.display(),
            checkpoint.len()
        );
    }

    let pb = ctx.progress.item_bar("realtime", 0);
    let processor = Processor::new(&provider, &dispatcher, config)?.with_progress(pb);
    let summary = ctx.block_on(processor.run(&items, &mut checkpoint, &ctx.cancel))?;

    ctx.report(|| summary.format_table(), || summary.log());

    if summary.is_complete() {
        if let Some(output) = &args.output {
            let mut results = checkpoint.results().to_vec();
            sort_by_input_order(&mut results, &items);
            write_json_atomic(output, &results)?;
            log::info!("Wrote {} results to {}", results.len(), output.display());
        }
    }
    if summary.failures_this_run > 0 {
        anyhow::bail!(
            "{} of {} items failed this run (see {})",
            summary.failures_this_run,
            summary.processed_this_run,
            checkpoint_path.display()
        );
    }
    if summary.interrupted {
        anyhow::bail!("Interrupted; run again to continue");
    }
    Ok(())
}
