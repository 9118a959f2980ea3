//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use batchline_batch::{SchedulerConfig, TrackerConfig};
use batchline_core::{CapacityConfig, DispatcherConfig, RetryPolicy};
use batchline_realtime::ProcessorConfig;

/// Global configuration for batchline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub capacity: CapacityConfig,
    pub scheduler: SchedulerSection,
    pub realtime: RealtimeSection,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    /// Per-call deadline for real-time requests
    pub call_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key: std::env::var("BATCHLINE_API_KEY").ok(),
            call_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub wait_for_waves: bool,
    pub submit_delay_ms: u64,
    pub rate_limit_backoff_secs: u64,
    pub max_submit_attempts: u32,
    /// Wave gating poll interval
    pub poll_interval_secs: u64,
    /// `submit --wait` / single job poll interval
    pub wait_poll_interval_secs: u64,
    pub not_found_grace_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            wait_for_waves: true,
            submit_delay_ms: 2000,
            rate_limit_backoff_secs: 60,
            max_submit_attempts: 5,
            poll_interval_secs: 30,
            wait_poll_interval_secs: 60,
            not_found_grace_secs: 120,
            max_wait_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    pub max_concurrent: usize,
    pub min_interval_ms: u64,
    pub items_per_day: usize,
    pub checkpoint_every: usize,
    /// Requests-per-minute cap; widens `min_interval_ms` when tighter
    pub rpm: Option<u32>,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            max_concurrent: 30,
            min_interval_ms: 50,
            items_per_day: 400,
            checkpoint_every: 10,
            rpm: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub batch_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            batch_dir: PathBuf::from("./batch_jobs"),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./batchline.toml (current directory)
    /// 2. ~/.config/batchline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("batchline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "batchline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn scheduler_config(&self, max_items_per_wave: usize) -> SchedulerConfig {
        let s = &self.scheduler;
        SchedulerConfig {
            max_items_per_wave,
            max_batch_size: self.capacity.max_batch_size,
            wait_for_waves: s.wait_for_waves,
            submit_delay: Duration::from_millis(s.submit_delay_ms),
            retry: RetryPolicy {
                max_attempts: s.max_submit_attempts,
                quota_backoff: Duration::from_secs(s.rate_limit_backoff_secs),
            },
            poll_interval: Duration::from_secs(s.poll_interval_secs),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            not_found_grace: Duration::from_secs(self.scheduler.not_found_grace_secs),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let r = &self.realtime;
        let mut min_interval = Duration::from_millis(r.min_interval_ms);
        if let Some(rpm) = r.rpm {
            min_interval = min_interval.max(DispatcherConfig::interval_for_rpm(rpm));
        }
        DispatcherConfig {
            max_concurrent: r.max_concurrent,
            min_interval,
            call_timeout: Duration::from_secs(self.provider.call_timeout_secs),
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            items_per_day: self.realtime.items_per_day,
            checkpoint_every: self.realtime.checkpoint_every,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.batch_dir, PathBuf::from("./batch_jobs"));
        assert_eq!(config.capacity.max_batch_size, 1000);
        assert_eq!(config.scheduler.rate_limit_backoff_secs, 60);
        assert_eq!(config.realtime.items_per_day, 400);
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("BATCHLINE_TEST_KEY", "secret");
        assert_eq!(
            expand_env_var("${BATCHLINE_TEST_KEY}"),
            Some("secret".to_string())
        );
        std::env::remove_var("BATCHLINE_TEST_KEY");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[provider]
base_url = "https://inference.example.com/v1"
api_key = "k-123"

[capacity]
enqueued_token_limit = 5000000
avg_input_tokens = 1000

[scheduler]
wait_for_waves = false
submit_delay_ms = 500

[realtime]
rpm = 60

[output]
batch_dir = "/tmp/jobs"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.capacity.enqueued_token_limit, 5_000_000);
        // Unset keys keep their defaults
        assert_eq!(config.capacity.safety_margin, 0.9);
        assert_eq!(config.capacity.max_items_per_wave().unwrap(), 4500);

        let sched = config.scheduler_config(4500);
        assert!(!sched.wait_for_waves);
        assert_eq!(sched.submit_delay, Duration::from_millis(500));
        assert_eq!(sched.retry.quota_backoff, Duration::from_secs(60));

        // 60 rpm is tighter than the 50ms default spacing
        assert_eq!(config.dispatcher_config().min_interval, Duration::from_secs(1));
        assert_eq!(config.output.batch_dir, PathBuf::from("/tmp/jobs"));
    }
}
