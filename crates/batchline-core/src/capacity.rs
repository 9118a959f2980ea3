//! Capacity and cost estimation for wave-based submission.
//!
//! Pure arithmetic: how many items fit under the provider's enqueued-token
//! ceiling at once, how many waves a workload needs, and what it costs on
//! each pricing tier.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const TOKEN_SCALE: f64 = 1_000_000.0;

/// Sizing inputs. Defaults match a Tier 1 batch quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Provider's ceiling on tokens held by submitted-but-unfinished jobs
    pub enqueued_token_limit: u64,
    /// Fraction of the ceiling we allow ourselves to use
    pub safety_margin: f64,
    pub avg_input_tokens: u64,
    pub avg_output_tokens: u64,
    /// Hard provider limit on requests per batch job
    pub max_batch_size: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            enqueued_token_limit: 10_000_000,
            safety_margin: 0.9,
            avg_input_tokens: 2800,
            avg_output_tokens: 150,
            max_batch_size: 1000,
        }
    }
}

impl CapacityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.avg_input_tokens == 0 {
            return Err(ConfigError("avg_input_tokens must be > 0".into()));
        }
        if self.avg_output_tokens == 0 {
            return Err(ConfigError("avg_output_tokens must be > 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError("max_batch_size must be > 0".into()));
        }
        if self.enqueued_token_limit == 0 {
            return Err(ConfigError("enqueued_token_limit must be > 0".into()));
        }
        if !(self.safety_margin > 0.0 && self.safety_margin <= 1.0) {
            return Err(ConfigError(format!(
                "safety_margin must be in (0, 1], got {}",
                self.safety_margin
            )));
        }
        Ok(())
    }

    /// `ceiling * margin`, rounded down
    pub fn safe_budget(&self) -> u64 {
        (self.enqueued_token_limit as f64 * self.safety_margin).floor() as u64
    }

    /// Items per wave under the safe budget.
    pub fn max_items_per_wave(&self) -> Result<usize, ConfigError> {
        self.validate()?;
        let per_wave = (self.safe_budget() / self.avg_input_tokens) as usize;
        if per_wave == 0 {
            return Err(ConfigError(format!(
                "safe budget of {} tokens cannot hold one item of {} tokens",
                self.safe_budget(),
                self.avg_input_tokens
            )));
        }
        Ok(per_wave)
    }
}

/// Per-million-token prices for one tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Asynchronous batch jobs (half price)
    Batch,
    /// Real-time per-item calls
    Standard,
}

impl Tier {
    pub fn pricing(self) -> Pricing {
        match self {
            Self::Batch => Pricing {
                input_per_million: 0.15,
                output_per_million: 1.25,
            },
            Self::Standard => Pricing {
                input_per_million: 0.30,
                output_per_million: 2.50,
            },
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Batch => f.write_str("batch"),
            Self::Standard => f.write_str("real-time"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostProjection {
    pub tier: Tier,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_usd: f64,
    pub output_usd: f64,
    pub total_usd: f64,
}

/// Project the cost of `total_items` calls on one tier.
pub fn project_cost(
    total_items: usize,
    avg_input_tokens: u64,
    avg_output_tokens: u64,
    tier: Tier,
) -> CostProjection {
    let pricing = tier.pricing();
    let input_tokens = total_items as u64 * avg_input_tokens;
    let output_tokens = total_items as u64 * avg_output_tokens;
    let input_usd = input_tokens as f64 / TOKEN_SCALE * pricing.input_per_million;
    let output_usd = output_tokens as f64 / TOKEN_SCALE * pricing.output_per_million;
    CostProjection {
        tier,
        input_tokens,
        output_tokens,
        input_usd,
        output_usd,
        total_usd: input_usd + output_usd,
    }
}

/// Wave/batch sizing and cost for one workload
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityPlan {
    pub total_items: usize,
    pub avg_input_tokens: u64,
    pub safe_budget: u64,
    pub max_items_per_wave: usize,
    pub max_batch_size: usize,
    pub num_waves: usize,
    pub wave_sizes: Vec<usize>,
    pub batches_per_wave: Vec<usize>,
    pub batch_cost: CostProjection,
    pub standard_cost: CostProjection,
}

/// Compute the plan for `total_items` under `config`.
pub fn estimate(total_items: usize, config: &CapacityConfig) -> Result<CapacityPlan, ConfigError> {
    let max_items_per_wave = config.max_items_per_wave()?;
    let num_waves = total_items.div_ceil(max_items_per_wave);

    let wave_sizes: Vec<usize> = (0..num_waves)
        .map(|k| {
            let start = k * max_items_per_wave;
            (start + max_items_per_wave).min(total_items) - start
        })
        .collect();
    let batches_per_wave = wave_sizes
        .iter()
        .map(|n| n.div_ceil(config.max_batch_size))
        .collect();

    Ok(CapacityPlan {
        total_items,
        avg_input_tokens: config.avg_input_tokens,
        safe_budget: config.safe_budget(),
        max_items_per_wave,
        max_batch_size: config.max_batch_size,
        num_waves,
        wave_sizes,
        batches_per_wave,
        batch_cost: project_cost(
            total_items,
            config.avg_input_tokens,
            config.avg_output_tokens,
            Tier::Batch,
        ),
        standard_cost: project_cost(
            total_items,
            config.avg_input_tokens,
            config.avg_output_tokens,
            Tier::Standard,
        ),
    })
}

impl CapacityPlan {
    /// Estimated enqueued tokens for a wave of `wave_size` items
    pub fn wave_tokens(&self, wave_size: usize) -> u64 {
        wave_size as u64 * self.avg_input_tokens
    }

    pub fn total_batches(&self) -> usize {
        self.batches_per_wave.iter().sum()
    }

    /// Dollars saved by choosing batch over real-time
    pub fn savings_usd(&self) -> f64 {
        self.standard_cost.total_usd - self.batch_cost.total_usd
    }

    pub fn savings_percent(&self) -> f64 {
        if self.standard_cost.total_usd > 0.0 {
            self.savings_usd() / self.standard_cost.total_usd * 100.0
        } else {
            0.0
        }
    }

    /// Minutes needed in real-time mode at `rpm` requests per minute
    pub fn realtime_minutes(&self, rpm: u32) -> Option<f64> {
        (rpm > 0).then(|| self.total_items as f64 / f64::from(rpm))
    }

    /// Invocations needed under a per-invocation item quota
    pub fn days_needed(&self, items_per_day: usize) -> Option<usize> {
        (items_per_day > 0).then(|| self.total_items.div_ceil(items_per_day))
    }

    /// Log the plan (non-TTY mode)
    pub fn log(&self) {
        log::info!(
            "capacity: {} items, safe budget {} tokens, {} items/wave, {} waves, {} batches",
            crate::progress::fmt_num(self.total_items),
            crate::progress::fmt_num(self.safe_budget as usize),
            crate::progress::fmt_num(self.max_items_per_wave),
            self.num_waves,
            self.total_batches()
        );
        log::info!(
            "cost: batch {}, real-time {} ({:.0}% saved with batch)",
            crate::progress::fmt_usd(self.batch_cost.total_usd),
            crate::progress::fmt_usd(self.standard_cost.total_usd),
            self.savings_percent()
        );
    }
}
