//! Work items and per-item results

use std::path::Path;

use anyhow::Context;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// One unit of classification work. Never mutated once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "contents")]
    pub content: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Outcome of one inference call, keyed by the original item id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Structured provider output (schema owned by the caller)
    Output(serde_json::Value),
    /// Per-item failure placeholder
    Error(String),
}

impl ItemResult {
    pub fn output(id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Output(value),
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Re-sort results into the order their ids appear in `items`.
///
/// Results whose id is not among `items` go last, in their existing order.
pub fn sort_by_input_order(results: &mut [ItemResult], items: &[WorkItem]) {
    let rank: rustc_hash::FxHashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.id.as_str(), i))
        .collect();
    results.sort_by_key(|r| rank.get(r.id.as_str()).copied().unwrap_or(usize::MAX));
}

/// Load a JSON array of work items, rejecting empty or duplicate ids.
pub fn load_items(path: &Path) -> anyhow::Result<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let items: Vec<WorkItem> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid work item JSON in {}", path.display()))?;
    validate_items(&items)?;
    log::info!("Loaded {} items from {}", items.len(), path.display());
    Ok(items)
}

/// Check id uniqueness within a run.
pub fn validate_items(items: &[WorkItem]) -> anyhow::Result<()> {
    let mut seen = FxHashSet::default();
    for (idx, item) in items.iter().enumerate() {
        anyhow::ensure!(!item.id.is_empty(), "Item #{idx} has an empty id");
        anyhow::ensure!(
            seen.insert(item.id.as_str()),
            "Duplicate item id: {}",
            item.id
        );
    }
    Ok(())
}
