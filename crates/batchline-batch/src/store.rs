//! On-disk layout of the batch directory.
//!
//! Per batch: `{name}.jsonl` (requests), `{name}_mapping.json`,
//! `{name}_job.json` (job metadata) and, once retrieved,
//! `{name}_results.jsonl`. All JSON goes through tmp + rename.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use batchline_core::{JobState, persist};

use crate::batch::IdMapping;
use crate::ledger::LEDGER_FILE;

/// Contents of `{name}_job.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub batch_name: String,
    pub batch_file: PathBuf,
    pub submitted_at: DateTime<Utc>,
    pub status: JobState,
}

#[derive(Debug, Clone)]
pub struct BatchStore {
    dir: PathBuf,
}

impl BatchStore {
    /// Open (creating if needed) the batch directory
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create batch directory {}", dir.display()))?;
        let removed = persist::cleanup_tmp_files(&dir)?;
        if removed > 0 {
            log::info!("Cleaned {removed} stale tmp files in {}", dir.display());
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_path(&self, batch_name: &str) -> PathBuf {
        self.dir.join(format!("{batch_name}.jsonl"))
    }

    pub fn mapping_path(&self, batch_name: &str) -> PathBuf {
        self.dir.join(format!("{batch_name}_mapping.json"))
    }

    pub fn job_path(&self, batch_name: &str) -> PathBuf {
        self.dir.join(format!("{batch_name}_job.json"))
    }

    pub fn results_path(&self, batch_name: &str) -> PathBuf {
        self.dir.join(format!("{batch_name}_results.jsonl"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    /// Persist the request payload and its id mapping before submission
    pub fn write_input(
        &self,
        batch_name: &str,
        payload: &[u8],
        mapping: &IdMapping,
    ) -> anyhow::Result<PathBuf> {
        let path = self.input_path(batch_name);
        persist::write_atomic(&path, payload)
            .with_context(|| format!("Cannot write {}", path.display()))?;
        persist::write_json_atomic(&self.mapping_path(batch_name), mapping)?;
        Ok(path)
    }

    pub fn load_mapping(&self, batch_name: &str) -> anyhow::Result<IdMapping> {
        persist::read_json(&self.mapping_path(batch_name))
    }

    pub fn save_job(&self, record: &JobRecord) -> anyhow::Result<()> {
        persist::write_json_atomic(&self.job_path(&record.batch_name), record)
    }

    pub fn load_job(&self, batch_name: &str) -> anyhow::Result<Option<JobRecord>> {
        persist::read_json_opt(&self.job_path(batch_name))
    }

    /// Refresh the status field of an existing metadata file
    pub fn update_job_status(&self, batch_name: &str, status: JobState) -> anyhow::Result<()> {
        if let Some(mut record) = self.load_job(batch_name)? {
            if record.status != status {
                record.status = status;
                self.save_job(&record)?;
            }
        }
        Ok(())
    }

    pub fn write_results(&self, batch_name: &str, artifact: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.results_path(batch_name);
        persist::write_atomic(&path, artifact)
            .with_context(|| format!("Cannot write {}", path.display()))?;
        Ok(path)
    }

    /// All job metadata files in the directory, oldest submission first.
    ///
    /// Unreadable files are logged and skipped.
    pub fn list_jobs(&self) -> anyhow::Result<Vec<JobRecord>> {
        let pattern = self.dir.join("*_job.json");
        let pattern_str = pattern.to_string_lossy();
        let mut records = Vec::new();
        for entry in glob::glob(&pattern_str).context("Invalid job file pattern")? {
            let path = match entry {
                Ok(p) => p,
                Err(_) => continue,
            };
            match persist::read_json::<JobRecord>(&path) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping {}: {e:#}", path.display()),
            }
        }
        records.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, secs: i64) -> JobRecord {
        JobRecord {
            job_id: format!("batches/{name}"),
            batch_name: name.to_string(),
            batch_file: PathBuf::from(format!("{name}.jsonl")),
            submitted_at: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
            status: JobState::Submitted,
        }
    }

    #[test]
    fn layout_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::open(dir.path()).unwrap();
        assert!(store.input_path("b").ends_with("b.jsonl"));
        assert!(store.mapping_path("b").ends_with("b_mapping.json"));
        assert!(store.job_path("b").ends_with("b_job.json"));
        assert!(store.results_path("b").ends_with("b_results.jsonl"));
        assert!(store.ledger_path().ends_with("job_tracking.json"));
    }

    #[test]
    fn job_status_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::open(dir.path()).unwrap();
        store.save_job(&record("b1", 0)).unwrap();
        store.update_job_status("b1", JobState::Failed).unwrap();
        let back = store.load_job("b1").unwrap().unwrap();
        assert_eq!(back.status, JobState::Failed);
        // Missing metadata is not an error
        store.update_job_status("nope", JobState::Failed).unwrap();
    }

    #[test]
    fn list_jobs_sorted_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::open(dir.path()).unwrap();
        store.save_job(&record("late", 100)).unwrap();
        store.save_job(&record("early", 0)).unwrap();
        std::fs::write(dir.path().join("broken_job.json"), b"{").unwrap();
        let jobs = store.list_jobs().unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.batch_name.as_str()).collect();
        assert_eq!(names, ["early", "late"]);
    }

    #[test]
    fn open_removes_stale_tmp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x_job.json.tmp"), b"half").unwrap();
        BatchStore::open(dir.path()).unwrap();
        assert!(!dir.path().join("x_job.json.tmp").exists());
    }
}
