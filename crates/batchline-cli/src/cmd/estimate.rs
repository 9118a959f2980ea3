//! Estimate subcommand: waves, batches and cost for a workload

use std::path::Path;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color};

use batchline_core::progress::{fmt_num, fmt_usd};
use batchline_core::{CapacityPlan, estimate, load_items};

use super::{Context, kv_table};

/// RPM assumed for the real-time comparison when none is configured
const DEFAULT_RPM: u32 = 60;

#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Item count, or path to a JSON array of work items
    pub items: String,

    /// Average input tokens per item
    #[arg(long)]
    pub avg_input_tokens: Option<u64>,

    /// Requests per minute for the real-time comparison
    #[arg(long)]
    pub rpm: Option<u32>,

    /// Item quota per real-time invocation
    #[arg(long)]
    pub items_per_day: Option<usize>,
}

fn item_count(arg: &str) -> Result<usize> {
    if let Ok(n) = arg.parse::<usize>() {
        return Ok(n);
    }
    Ok(load_items(Path::new(arg))?.len())
}

pub fn run(args: EstimateArgs, ctx: &Context) -> Result<()> {
    let total = item_count(&args.items)?;
    let mut capacity = ctx.config.capacity.clone();
    if let Some(tokens) = args.avg_input_tokens {
        capacity.avg_input_tokens = tokens;
    }
    let plan = estimate(total, &capacity)?;
    let rpm = args
        .rpm
        .or(ctx.config.realtime.rpm)
        .unwrap_or(DEFAULT_RPM);
    let items_per_day = args
        .items_per_day
        .unwrap_or(ctx.config.realtime.items_per_day);

    ctx.report(
        || format_table(&plan, rpm, items_per_day),
        || plan.log(),
    );
    Ok(())
}

fn format_table(plan: &CapacityPlan, rpm: u32, items_per_day: usize) -> String {
    let mut table = kv_table("Capacity");
    table.add_row(vec![
        Cell::new("Items"),
        Cell::new(fmt_num(plan.total_items)),
    ]);
    table.add_row(vec![
        Cell::new("Safe token budget"),
        Cell::new(fmt_num(plan.safe_budget as usize)),
    ]);
    table.add_row(vec![
        Cell::new("Items per wave"),
        Cell::new(fmt_num(plan.max_items_per_wave)),
    ]);
    table.add_row(vec![
        Cell::new("Waves").fg(Color::Green),
        Cell::new(plan.num_waves).fg(Color::Green),
    ]);
    table.add_row(vec![
        Cell::new("Batches"),
        Cell::new(format!(
            "{} ({} max per batch)",
            plan.total_batches(),
            fmt_num(plan.max_batch_size)
        )),
    ]);
    table.add_row(vec![
        Cell::new("Batch cost"),
        Cell::new(fmt_usd(plan.batch_cost.total_usd)),
    ]);
    table.add_row(vec![
        Cell::new("Real-time cost"),
        Cell::new(fmt_usd(plan.standard_cost.total_usd)),
    ]);
    table.add_row(vec![
        Cell::new("Batch savings").fg(Color::Green),
        Cell::new(format!(
            "{} ({:.0}%)",
            fmt_usd(plan.savings_usd()),
            plan.savings_percent()
        ))
        .fg(Color::Green),
    ]);
    if let Some(minutes) = plan.realtime_minutes(rpm) {
        table.add_row(vec![
            Cell::new(format!("Real-time @ {rpm} rpm")),
            Cell::new(format!("{minutes:.1} min")),
        ]);
    }
    if let Some(days) = plan.days_needed(items_per_day) {
        table.add_row(vec![
            Cell::new(format!("Days @ {items_per_day}/day")),
            Cell::new(days),
        ]);
    }

    let mut waves = kv_table("Wave");
    waves.set_header(vec![
        Cell::new("Wave").fg(Color::Cyan),
        Cell::new("Items").fg(Color::Cyan),
        Cell::new("Batches").fg(Color::Cyan),
        Cell::new("Tokens").fg(Color::Cyan),
    ]);
    for (idx, (&size, &batches)) in plan
        .wave_sizes
        .iter()
        .zip(&plan.batches_per_wave)
        .enumerate()
    {
        waves.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(fmt_num(size)),
            Cell::new(batches),
            Cell::new(fmt_num(plan.wave_tokens(size) as usize)),
        ]);
    }

    format!("\n{table}\n{waves}")
}

#[cfg(test)]
mod tests {
    use batchline_core::CapacityConfig;

    use super::*;

    #[test]
    fn count_or_items_file() {
        assert_eq!(item_count("12000").unwrap(), 12_000);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(
            &path,
            r#"[{"id": "a", "title": "t", "content": "c"}, {"id": "b", "title": "t", "content": "c"}]"#,
        )
        .unwrap();
        assert_eq!(item_count(path.to_str().unwrap()).unwrap(), 2);
        assert!(item_count("/nonexistent/items.json").is_err());
    }

    #[test]
    fn table_lists_every_wave() {
        let plan = estimate(12_000, &CapacityConfig::default()).unwrap();
        let out = format_table(&plan, 60, 400);
        assert!(out.contains("3,214"));
        assert!(out.contains("2,358"));
        assert!(out.contains("200.0 min"));
        assert!(out.contains("Days @ 400/day"));
    }
}
