//! List subcommand: every job recorded in the batch directory

use anyhow::Result;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use batchline_batch::{BatchStore, JobRecord, Ledger};
use batchline_core::JobState;

use super::Context;

struct Row {
    record: JobRecord,
    wave: Option<usize>,
    item_count: Option<usize>,
}

/// Job records, oldest first, with the ledger's newer status where it has one
fn collect(store: &BatchStore) -> Result<Vec<Row>> {
    let ledger = Ledger::load(&store.ledger_path())?;
    let rows = store
        .list_jobs()?
        .into_iter()
        .map(|mut record| {
            let entry = ledger.find(&record.batch_name);
            if let Some(entry) = entry {
                if record.status.can_advance_to(entry.status) {
                    record.status = entry.status;
                }
            }
            Row {
                wave: entry.map(|e| e.wave),
                item_count: entry.map(|e| e.item_count),
                record,
            }
        })
        .collect();
    Ok(rows)
}

pub fn run(ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    let rows = collect(&store)?;
    if rows.is_empty() {
        log::info!("No jobs in {}", store.dir().display());
        return Ok(());
    }

    if !ctx.progress.is_tty() {
        for row in &rows {
            log::info!(
                "{} {} {} {}",
                row.record.batch_name,
                row.record.job_id,
                row.record.submitted_at.format("%Y-%m-%d %H:%M:%S"),
                row.record.status
            );
        }
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Batch").fg(Color::Cyan),
            Cell::new("Job id").fg(Color::Cyan),
            Cell::new("Wave").fg(Color::Cyan),
            Cell::new("Items").fg(Color::Cyan),
            Cell::new("Submitted").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
        ]);
    for row in &rows {
        let status = row.record.status;
        let color = match status {
            JobState::Succeeded => Color::Green,
            JobState::Failed | JobState::Cancelled => Color::Red,
            JobState::Submitted | JobState::Running => Color::Yellow,
        };
        table.add_row(vec![
            Cell::new(&row.record.batch_name),
            Cell::new(&row.record.job_id),
            Cell::new(row.wave.map_or_else(|| "-".to_string(), |w| w.to_string())),
            Cell::new(row.item_count.map_or_else(|| "-".to_string(), |n| n.to_string())),
            Cell::new(row.record.submitted_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(status).fg(color),
        ]);
    }
    eprintln!("\n{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use batchline_batch::LedgerEntry;

    use super::*;

    fn record(name: &str, job_id: &str, minutes_ago: i64) -> JobRecord {
        JobRecord {
            job_id: job_id.to_string(),
            batch_name: name.to_string(),
            batch_file: format!("{name}.jsonl").into(),
            submitted_at: Utc::now() - Duration::minutes(minutes_ago),
            status: JobState::Submitted,
        }
    }

    #[test]
    fn ledger_status_wins_when_newer() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::open(dir.path()).unwrap();
        store.save_job(&record("r_wave01_batch001", "batches/job-001", 10)).unwrap();
        store.save_job(&record("r_wave01_batch002", "batches/job-002", 5)).unwrap();

        let mut ledger = Ledger::load(&store.ledger_path()).unwrap();
        ledger
            .append(LedgerEntry {
                wave: 1,
                batch_num: 1,
                batch_name: "r_wave01_batch001".into(),
                job_id: "batches/job-001".into(),
                item_count: 7,
                submitted_at: Utc::now(),
                status: JobState::Succeeded,
            })
            .unwrap();

        let rows = collect(&store).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].record.batch_name, "r_wave01_batch001");
        assert_eq!(rows[0].record.status, JobState::Succeeded);
        assert_eq!(rows[0].item_count, Some(7));
        assert_eq!(rows[1].record.status, JobState::Submitted);
        assert_eq!(rows[1].wave, None);
    }
}
