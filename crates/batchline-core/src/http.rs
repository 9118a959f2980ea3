//! REST adapter for the inference provider.
//!
//! Wire contract (all JSON unless noted):
//! - `POST {base}/batches`, JSONL body, `x-batch-name` header → `{"job_id": ..}`
//! - `GET {base}/batches/{id}` → status record
//! - `GET {base}/batches/{id}/output` → JSONL artifact
//! - `POST {base}/classify` → structured result for one item

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ConfigError, ProviderError};
use crate::item::WorkItem;
use crate::provider::{JobState, JobStatus, Provider};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on any single request; per-call deadlines are tighter
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    job_id: String,
}

/// Status record as the provider sends it
#[derive(Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    completed_count: u64,
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    update_time: Option<DateTime<Utc>>,
}

impl HttpProvider {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ConfigError> {
        if api_key.is_empty() {
            return Err(ConfigError("provider API key is empty".into()));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError(format!("invalid provider base URL: {base_url}")));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Send, map non-2xx onto [`ProviderError`], return the body bytes
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Vec<u8>, ProviderError> {
        let resp = req
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            // Keep provider messages short in logs
            let message: String = text.chars().take(200).collect();
            return Err(ProviderError::from_status(status.as_u16(), message));
        }
        Ok(body.to_vec())
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8], what: &str) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::Http {
        status: None,
        message: format!("invalid {what} JSON: {e}"),
    })
}

fn parse_status(body: &[u8]) -> Result<JobStatus, ProviderError> {
    let raw: StatusResponse = decode(body, "status")?;
    let state = JobState::from_name(&raw.state).ok_or_else(|| ProviderError::Http {
        status: None,
        message: format!("unknown job state: {}", raw.state),
    })?;
    Ok(JobStatus {
        state,
        completed_count: raw.completed_count,
        total_count: raw.total_count,
        create_time: raw.create_time,
        update_time: raw.update_time,
    })
}

impl Provider for HttpProvider {
    async fn submit(&self, batch_name: &str, payload: Vec<u8>) -> Result<String, ProviderError> {
        let req = self
            .client
            .post(self.url("batches"))
            .header(reqwest::header::CONTENT_TYPE, "application/jsonl")
            .header("x-batch-name", batch_name)
            .body(payload);
        let body = self.send(req).await?;
        let resp: SubmitResponse = decode(&body, "submit")?;
        Ok(resp.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, ProviderError> {
        let req = self.client.get(self.url(&format!("batches/{job_id}")));
        let body = self.send(req).await.map_err(|e| match e {
            ProviderError::NotFound(_) => ProviderError::NotFound(job_id.to_string()),
            other => other,
        })?;
        parse_status(&body)
    }

    async fn retrieve(&self, job_id: &str) -> Result<Vec<u8>, ProviderError> {
        let req = self.client.get(self.url(&format!("batches/{job_id}/output")));
        self.send(req).await
    }

    async fn call(&self, item: &WorkItem) -> Result<serde_json::Value, ProviderError> {
        let payload =
            serde_json::to_vec(item).map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;
        let req = self
            .client
            .post(self.url("classify"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        let body = self.send(req).await?;
        decode(&body, "classification")
    }
}
