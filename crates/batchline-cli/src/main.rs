//! batchline - Batch and real-time inference dispatcher
//!
//! Sizes a workload against the provider's enqueued-token quota, submits it
//! as waves of batch jobs and tracks them to completion, or classifies it
//! item by item under a daily quota with resumable checkpoints.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "batchline")]
#[command(about = "Batch and real-time inference dispatcher")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./batchline.toml or ~/.config/batchline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Estimate waves, batches and cost for a workload
    Estimate(cmd::estimate::EstimateArgs),
    /// Submit items as waves of batch jobs
    Submit(cmd::submit::SubmitArgs),
    /// Show the status of one batch job
    Status(cmd::status::StatusArgs),
    /// Download and map the results of a finished job
    Results(cmd::results::ResultsArgs),
    /// List recorded batch jobs
    List,
    /// Classify items one at a time under a daily quota
    Realtime(cmd::realtime::RealtimeArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(batchline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    batchline_core::init_logging(quiet, cli.debug, multi)?;

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    if let Command::Config = cli.command {
        print_config(&config);
        return Ok(());
    }

    let ctx = cmd::Context::new(config, progress)?;
    match cli.command {
        Command::Estimate(args) => cmd::estimate::run(args, &ctx),
        Command::Submit(args) => cmd::submit::run(args, &ctx),
        Command::Status(args) => cmd::status::run(args, &ctx),
        Command::Results(args) => cmd::results::run(args, &ctx),
        Command::List => cmd::list::run(&ctx),
        Command::Realtime(args) => cmd::realtime::run(args, &ctx),
        Command::Config => Ok(()),
    }
}

fn print_config(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let p = &config.provider;
    table.add_row(vec!["Provider URL", &p.base_url]);
    table.add_row(vec![
        "API key",
        if p.api_key.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec!["Call timeout", &format!("{}s", p.call_timeout_secs)]);

    let c = &config.capacity;
    table.add_row(vec![
        "Enqueued token limit",
        &format!(
            "{} (margin {})",
            batchline_core::fmt_num(c.enqueued_token_limit as usize),
            c.safety_margin
        ),
    ]);
    table.add_row(vec![
        "Avg tokens in/out",
        &format!("{}/{}", c.avg_input_tokens, c.avg_output_tokens),
    ]);
    table.add_row(vec!["Max batch size", &c.max_batch_size.to_string()]);

    let s = &config.scheduler;
    table.add_row(vec![
        "Wave gating",
        if s.wait_for_waves { "on" } else { "off" },
    ]);
    table.add_row(vec!["Submit delay", &format!("{}ms", s.submit_delay_ms)]);
    table.add_row(vec![
        "Quota backoff",
        &format!(
            "{}s ({} attempts)",
            s.rate_limit_backoff_secs, s.max_submit_attempts
        ),
    ]);
    table.add_row(vec![
        "Poll interval",
        &format!(
            "{}s gating, {}s wait (max {}s)",
            s.poll_interval_secs, s.wait_poll_interval_secs, s.max_wait_secs
        ),
    ]);

    let r = &config.realtime;
    table.add_row(vec![
        "Real-time",
        &format!(
            "{} concurrent, {}ms spacing{}",
            r.max_concurrent,
            r.min_interval_ms,
            r.rpm.map(|rpm| format!(", {rpm} rpm")).unwrap_or_default()
        ),
    ]);
    table.add_row(vec![
        "Daily quota",
        &format!(
            "{} items (checkpoint every {})",
            r.items_per_day, r.checkpoint_every
        ),
    ]);
    table.add_row(vec![
        "Batch directory",
        &config.output.batch_dir.display().to_string(),
    ]);

    eprintln!("\n{table}");
}
