//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::executor::{RetryConfig, RetryPolicy};
use crate::priority::Priority;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Max dispatched requests across all lanes
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Max queued entries per lane
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Lane names, highest priority first
    #[serde(default = "default_lanes")]
    pub lanes: Vec<Priority>,

    /// Per-attempt deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    /// How long successful results are served from cache; `null` disables caching
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: Option<u64>,

    /// Minimum time between sweeps of expired cache entries
    #[serde(default = "default_cache_prune_interval_ms")]
    pub cache_prune_interval_ms: u64,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_max_queue_size() -> usize {
    100
}

fn default_lanes() -> Vec<Priority> {
    vec![Priority::HIGH, Priority::NORMAL]
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_cache_ttl_ms() -> Option<u64> {
    Some(10_000)
}

fn default_cache_prune_interval_ms() -> u64 {
    60_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queue_size: default_max_queue_size(),
            lanes: default_lanes(),
            timeout_ms: default_timeout_ms(),
            retry: RetryConfig::default(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_prune_interval_ms: default_cache_prune_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Get the per-attempt timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_ms.map(Duration::from_millis)
    }

    pub fn cache_prune_interval(&self) -> Duration {
        Duration::from_millis(self.cache_prune_interval_ms)
    }

    /// Retry policy used when a request carries no overrides
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.timeout(), &self.retry)
    }

    /// Check limits and lanes, returning a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max-concurrent must be at least 1".to_string());
        }
        if self.max_queue_size == 0 {
            return Err("max-queue-size must be at least 1".to_string());
        }
        if self.lanes.is_empty() {
            return Err("at least one lane is required".to_string());
        }
        for (i, lane) in self.lanes.iter().enumerate() {
            if self.lanes[..i].contains(lane) {
                return Err(format!("duplicate lane: {}", lane));
            }
        }
        if self.timeout_ms == 0 {
            return Err("timeout-ms must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(format!("retry jitter must be within 0.0-1.0, got {}", self.retry.jitter));
        }
        Ok(())
    }
}
