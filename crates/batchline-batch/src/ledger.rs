//! Job tracking ledger (`job_tracking.json`).
//!
//! Append-only: entries are never removed, only their `status` is refreshed.
//! Every mutation rewrites the whole file atomically.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use batchline_core::{JobState, persist};

pub const LEDGER_FILE: &str = "job_tracking.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub wave: usize,
    pub batch_num: usize,
    pub batch_name: String,
    pub job_id: String,
    pub item_count: usize,
    pub submitted_at: DateTime<Utc>,
    #[serde(default = "submitted")]
    pub status: JobState,
}

fn submitted() -> JobState {
    JobState::Submitted
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    /// Load the ledger at `path`; a missing file is an empty ledger
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let entries: Vec<LedgerEntry> = persist::read_json_opt(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn append(&mut self, entry: LedgerEntry) -> anyhow::Result<()> {
        self.entries.push(entry);
        self.save()
    }

    /// Latest entry recorded under `batch_name`
    pub fn find(&self, batch_name: &str) -> Option<&LedgerEntry> {
        self.entries.iter().rev().find(|e| e.batch_name == batch_name)
    }

    pub fn find_job(&self, job_id: &str) -> Option<&LedgerEntry> {
        self.entries.iter().rev().find(|e| e.job_id == job_id)
    }

    /// Set the status of every entry for `job_id`; saves only on change
    pub fn update_status(&mut self, job_id: &str, status: JobState) -> anyhow::Result<bool> {
        let mut changed = false;
        for entry in self.entries.iter_mut().filter(|e| e.job_id == job_id) {
            if entry.status != status {
                entry.status = status;
                changed = true;
            }
        }
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    fn save(&self) -> anyhow::Result<()> {
        persist::write_json_atomic(&self.path, &self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(batch_num: usize, job_id: &str) -> LedgerEntry {
        LedgerEntry {
            wave: 1,
            batch_num,
            batch_name: format!("run_wave01_batch{batch_num:03}"),
            job_id: job_id.to_string(),
            item_count: 10,
            submitted_at: Utc::now(),
            status: JobState::Submitted,
        }
    }

    #[test]
    fn append_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        let mut ledger = Ledger::load(&path).unwrap();
        assert!(ledger.entries().is_empty());
        ledger.append(entry(1, "j1")).unwrap();
        ledger.append(entry(2, "j2")).unwrap();

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.entries().len(), 2);
        assert_eq!(reloaded.find("run_wave01_batch002").unwrap().job_id, "j2");
    }

    #[test]
    fn status_refresh_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);
        let mut ledger = Ledger::load(&path).unwrap();
        ledger.append(entry(1, "j1")).unwrap();
        assert!(ledger.update_status("j1", JobState::Failed).unwrap());
        assert!(!ledger.update_status("j1", JobState::Failed).unwrap());

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.entries().len(), 1);
        assert_eq!(reloaded.find_job("j1").unwrap().status, JobState::Failed);
    }

    #[test]
    fn entry_without_status_reads_as_submitted() {
        let json = r#"[{"wave": 1, "batch_num": 1, "batch_name": "b", "job_id": "j",
            "item_count": 5, "submitted_at": "2025-01-14T10:00:00Z"}]"#;
        let entries: Vec<LedgerEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].status, JobState::Submitted);
    }
}
