//! Resumable result set for real-time runs.
//!
//! On disk: `{"processed": [ids...], "results": [ItemResult...]}`, rewritten
//! atomically. In memory `processed` is always exactly the id set of
//! `results`.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use batchline_core::{ItemResult, WorkItem, persist};

#[derive(Serialize, Deserialize, Default)]
struct CheckpointFile {
    #[serde(default)]
    processed: Vec<String>,
    #[serde(default)]
    results: Vec<ItemResult>,
}

#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    processed: FxHashSet<String>,
    results: Vec<ItemResult>,
}

impl Checkpoint {
    /// Load the checkpoint at `path`, or start empty if there is none.
    ///
    /// Duplicate result ids keep their first occurrence.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file: CheckpointFile = persist::read_json_opt(path)?.unwrap_or_default();
        let mut checkpoint = Self {
            path: path.to_path_buf(),
            processed: FxHashSet::default(),
            results: Vec::with_capacity(file.results.len()),
        };
        let mut duplicates = 0;
        for result in file.results {
            if !checkpoint.record(result) {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            log::warn!(
                "{}: dropped {duplicates} duplicate results",
                path.display()
            );
        }
        if file.processed.len() != checkpoint.processed.len() {
            log::warn!(
                "{}: processed list ({}) disagrees with results ({}), using results",
                path.display(),
                file.processed.len(),
                checkpoint.processed.len()
            );
        }
        if !checkpoint.is_empty() {
            log::info!(
                "Resuming from {}: {} items already processed",
                path.display(),
                checkpoint.len()
            );
        }
        Ok(checkpoint)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a result; `false` (and no change) if its id is already processed
    pub fn record(&mut self, result: ItemResult) -> bool {
        if !self.processed.insert(result.id.clone()) {
            return false;
        }
        self.results.push(result);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }

    pub fn results(&self) -> &[ItemResult] {
        &self.results
    }

    /// Items not yet processed, in input order
    pub fn pending<'a>(&self, items: &'a [WorkItem]) -> Vec<&'a WorkItem> {
        items.iter().filter(|i| !self.contains(&i.id)).collect()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let file = CheckpointFile {
            processed: self.results.iter().map(|r| r.id.clone()).collect(),
            results: self.results.clone(),
        };
        persist::write_json_atomic(&self.path, &file)?;
        log::debug!("Checkpoint saved: {} results", self.results.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::load(&dir.path().join("cp.json")).unwrap();
        assert!(cp.is_empty());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let mut cp = Checkpoint::load(&path).unwrap();
        assert!(cp.record(ItemResult::output("a", serde_json::json!({"label": 1}))));
        assert!(cp.record(ItemResult::error("b", "timeout")));
        assert!(!cp.record(ItemResult::output("a", serde_json::Value::Null)));
        cp.save().unwrap();

        let back = Checkpoint::load(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.failures(), 1);
        assert!(back.contains("b"));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["processed"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn duplicates_on_disk_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(
            &path,
            r#"{"processed": ["a", "a"], "results": [
                {"id": "a", "output": 1},
                {"id": "a", "output": 2}
            ]}"#,
        )
        .unwrap();
        let cp = Checkpoint::load(&path).unwrap();
        assert_eq!(cp.len(), 1);
        assert_eq!(cp.results()[0], ItemResult::output("a", serde_json::json!(1)));
    }

    #[test]
    fn pending_preserves_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut cp = Checkpoint::load(&dir.path().join("cp.json")).unwrap();
        cp.record(ItemResult::output("b", serde_json::Value::Null));
        let items: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| WorkItem::new(*id, "", ""))
            .collect();
        let pending: Vec<_> = cp.pending(&items).into_iter().map(|i| i.id.as_str()).collect();
        assert_eq!(pending, ["a", "c"]);
    }
}
