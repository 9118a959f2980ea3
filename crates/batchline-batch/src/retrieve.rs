//! Result retrieval: download a finished job's artifact and map its line
//! records back to original item ids.

use serde::Deserialize;

use batchline_core::{ItemResult, JobState, Provider, ProviderError};

use crate::batch::IdMapping;
use crate::store::BatchStore;

#[derive(Debug)]
pub enum RetrieveError {
    /// Job hasn't reached SUCCEEDED
    NotReady(JobState),
    Provider(ProviderError),
    Storage(anyhow::Error),
}

impl std::fmt::Display for RetrieveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotReady(state) => write!(f, "job not completed (state: {state})"),
            Self::Provider(e) => write!(f, "{e}"),
            Self::Storage(e) => write!(f, "storage error: {e:#}"),
        }
    }
}

impl std::error::Error for RetrieveError {}

impl RetrieveError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotReady(state) => !state.is_terminal(),
            Self::Provider(e) => e.is_retryable(),
            Self::Storage(_) => false,
        }
    }
}

/// Parsed artifact
#[derive(Debug, Default)]
pub struct RetrieveReport {
    /// Unordered; use `sort_by_input_order` for input order
    pub results: Vec<ItemResult>,
    pub malformed: usize,
    pub unmapped: usize,
}

impl RetrieveReport {
    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }
}

/// One output line as the provider writes it
#[derive(Deserialize)]
struct OutputLine {
    custom_id: String,
    #[serde(default)]
    response: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn error_message(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Object(ref map) => match map.get("message") {
            Some(serde_json::Value::String(msg)) => msg.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}

/// Map artifact lines onto original ids.
///
/// Malformed lines and lines whose `custom_id` isn't in `mapping` are
/// logged and skipped; neither aborts the parse.
pub fn parse_results(artifact: &[u8], mapping: &IdMapping) -> RetrieveReport {
    let mut report = RetrieveReport::default();
    for (idx, line) in artifact.split(|&b| b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record: OutputLine = match serde_json::from_slice(line) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Line {}: malformed result record: {e}", idx + 1);
                report.malformed += 1;
                continue;
            }
        };
        let Some(id) = mapping.get(&record.custom_id) else {
            log::warn!("Line {}: unknown custom_id {}", idx + 1, record.custom_id);
            report.unmapped += 1;
            continue;
        };
        let result = match (record.response, record.error) {
            (_, Some(err)) => ItemResult::error(id, error_message(err)),
            (Some(response), None) => ItemResult::output(id, response),
            (None, None) => {
                log::warn!("Line {}: no response for {}", idx + 1, record.custom_id);
                report.malformed += 1;
                continue;
            }
        };
        report.results.push(result);
    }
    report
}

/// Download, store and parse the results of a SUCCEEDED job.
pub async fn retrieve_results<P: Provider>(
    provider: &P,
    store: &BatchStore,
    job_id: &str,
    batch_name: &str,
) -> Result<RetrieveReport, RetrieveError> {
    let status = provider.poll(job_id).await.map_err(RetrieveError::Provider)?;
    if status.state != JobState::Succeeded {
        return Err(RetrieveError::NotReady(status.state));
    }

    log::info!("{batch_name}: downloading results of {job_id}");
    let artifact = provider
        .retrieve(job_id)
        .await
        .map_err(RetrieveError::Provider)?;
    let path = store
        .write_results(batch_name, &artifact)
        .map_err(RetrieveError::Storage)?;
    let mapping = store
        .load_mapping(batch_name)
        .map_err(RetrieveError::Storage)?;

    let report = parse_results(&artifact, &mapping);
    log::info!(
        "{batch_name}: {} results ({} errors, {} malformed, {} unmapped) -> {}",
        report.results.len(),
        report.error_count(),
        report.malformed,
        report.unmapped,
        path.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use batchline_core::WorkItem;
    use batchline_core::testing::ScriptedProvider;

    use super::*;
    use crate::batch::{Batch, build_payload};

    fn mapping_for(n: usize) -> (Vec<WorkItem>, Vec<u8>, IdMapping) {
        let items: Vec<WorkItem> = (0..n)
            .map(|i| WorkItem::new(format!("item-{i}"), format!("t{i}"), "c"))
            .collect();
        let (payload, mapping) = build_payload(&Batch {
            wave: 1,
            batch_num: 1,
            items: &items,
        })
        .unwrap();
        (items, payload, mapping)
    }

    #[test]
    fn one_malformed_line_among_500() {
        let (_, _, mapping) = mapping_for(500);
        let mut artifact = String::new();
        for i in 0..500 {
            if i == 250 {
                artifact.push_str("{\"custom_id\": \"request_250\", \"response\": \n");
            } else {
                artifact.push_str(&format!(
                    "{{\"custom_id\": \"request_{i}\", \"response\": {{\"label\": \"x\"}}}}\n"
                ));
            }
        }
        let report = parse_results(artifact.as_bytes(), &mapping);
        assert_eq!(report.results.len(), 499);
        assert_eq!(report.malformed, 1);
        assert!(report.results.iter().all(|r| r.id != "item-250"));
    }

    #[test]
    fn unknown_custom_id_skipped() {
        let (_, _, mapping) = mapping_for(2);
        let artifact = b"{\"custom_id\": \"request_0\", \"response\": 1}\n{\"custom_id\": \"request_9\", \"response\": 2}\n";
        let report = parse_results(artifact, &mapping);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].id, "item-0");
        assert_eq!(report.unmapped, 1);
    }

    #[test]
    fn error_records_become_tagged_results() {
        let (_, _, mapping) = mapping_for(2);
        let artifact = br#"{"custom_id": "request_0", "error": {"code": 500, "message": "internal"}}
{"custom_id": "request_1", "error": "blocked"}
"#;
        let report = parse_results(artifact, &mapping);
        assert_eq!(report.error_count(), 2);
        assert_eq!(report.results[0], ItemResult::error("item-0", "internal"));
        assert_eq!(report.results[1], ItemResult::error("item-1", "blocked"));
    }

    #[test]
    fn blank_lines_ignored() {
        let (_, _, mapping) = mapping_for(1);
        let artifact = b"\n{\"custom_id\": \"request_0\", \"response\": {}}\n\n";
        let report = parse_results(artifact, &mapping);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.malformed, 0);
    }

    #[tokio::test]
    async fn not_ready_until_succeeded() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::open(dir.path()).unwrap();
        let (_, payload, mapping) = mapping_for(3);
        store.write_input("b1", &payload, &mapping).unwrap();
        let provider = ScriptedProvider::new();
        let job_id = provider.submit("b1", payload).await.unwrap();

        // First poll observes RUNNING
        let err = retrieve_results(&provider, &store, &job_id, "b1").await.unwrap_err();
        assert!(matches!(err, RetrieveError::NotReady(JobState::Running)));
        assert!(err.is_retryable());

        let report = retrieve_results(&provider, &store, &job_id, "b1").await.unwrap();
        assert_eq!(report.results.len(), 3);
        assert!(store.results_path("b1").exists());
        let mut ids: Vec<_> = report.results.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, ["item-0", "item-1", "item-2"]);
    }

    #[tokio::test]
    async fn failed_job_is_not_ready_and_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::open(dir.path()).unwrap();
        let provider = ScriptedProvider::new().with_script("b1", &[JobState::Failed]);
        let job_id = provider.submit("b1", Vec::new()).await.unwrap();
        let err = retrieve_results(&provider, &store, &job_id, "b1").await.unwrap_err();
        assert!(matches!(err, RetrieveError::NotReady(JobState::Failed)));
        assert!(!err.is_retryable());
    }
}
