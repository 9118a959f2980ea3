//! Subcommands and the context they share

pub mod estimate;
pub mod list;
pub mod realtime;
pub mod results;
pub mod status;
pub mod submit;

use std::future::Future;

use anyhow::{Context as _, Result};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use batchline_batch::BatchStore;
use batchline_core::{HttpProvider, SharedProgress};

use crate::config::Config;

/// Everything a subcommand needs: settings, progress display, the async
/// runtime and a token cancelled on Ctrl-C.
pub struct Context {
    pub config: Config,
    pub progress: SharedProgress,
    pub cancel: CancellationToken,
    runtime: Runtime,
}

impl Context {
    pub fn new(config: Config, progress: SharedProgress) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received, stopping after the current step");
                token.cancel();
            }
        });

        Ok(Self {
            config,
            progress,
            cancel,
            runtime,
        })
    }

    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    pub fn provider(&self) -> Result<HttpProvider> {
        let api_key = self.config.provider.api_key.as_deref().unwrap_or_default();
        HttpProvider::new(&self.config.provider.base_url, api_key)
            .context("Provider not configured (set provider.api_key or BATCHLINE_API_KEY)")
    }

    pub fn store(&self) -> Result<BatchStore> {
        BatchStore::open(&self.config.output.batch_dir)
    }

    /// Print a table on TTY, or hand the data to `log_fn` otherwise.
    pub fn report(&self, table: impl FnOnce() -> String, log_fn: impl FnOnce()) {
        if self.progress.is_tty() {
            eprintln!("{}", table());
        } else {
            log_fn();
        }
    }
}

/// Two-column table with the house style
pub fn kv_table(title: &str) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title)
                .fg(Color::Cyan)
                .add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table
}
