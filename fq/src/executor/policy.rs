//! Retry and timeout policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * (attempt + 1)`
    #[default]
    Linear,

    /// `base * 2^attempt`
    Exponential,
}

/// Retry configuration as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Random extra delay as a fraction of the computed backoff (0.0 - 1.0)
    #[serde(default)]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    1500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            strategy: BackoffStrategy::Linear,
            max_backoff_ms: default_max_backoff_ms(),
            jitter: 0.0,
        }
    }
}

/// Resolved policy for one dispatched unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Deadline for each attempt
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
    pub strategy: BackoffStrategy,
    pub max_backoff: Duration,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, retry: &RetryConfig) -> Self {
        Self {
            timeout,
            max_retries: retry.max_retries,
            backoff: Duration::from_millis(retry.backoff_ms),
            strategy: retry.strategy,
            max_backoff: Duration::from_millis(retry.max_backoff_ms),
            jitter: retry.jitter.clamp(0.0, 1.0),
        }
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows failed `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.strategy {
            BackoffStrategy::Linear => self.backoff.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => self.backoff.saturating_mul(2u32.saturating_pow(attempt)),
        };
        let base = base.min(self.max_backoff);
        if self.jitter > 0.0 {
            let extra = rand::rng().random_range(0.0..=self.jitter);
            base.mul_f64(1.0 + extra).min(self.max_backoff)
        } else {
            base
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), &RetryConfig::default())
    }
}
