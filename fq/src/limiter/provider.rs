//! Mapping request keys to provider rate-limit policies

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LimiterError;

use super::TokenBucket;

/// Rate limit for one provider, as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderConfig {
    /// First segment of the request key, e.g. `BITUNIX` in `BITUNIX:KLINES:BTCUSDT`
    pub prefix: String,

    /// Sustained requests per second
    pub rate_per_second: f64,

    /// Burst size; defaults to one second worth of tokens, and never less than one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<f64>,
}

impl ProviderConfig {
    pub fn new(prefix: impl Into<String>, rate_per_second: f64) -> Self {
        Self {
            prefix: prefix.into(),
            rate_per_second,
            burst: None,
        }
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = Some(burst);
        self
    }
}

/// What the scheduler should do about rate for a given key
#[derive(Debug, Clone, PartialEq)]
pub enum RatePolicy {
    /// Bounded only by global concurrency
    Unthrottled,

    /// Gated by a token bucket shared by every key of `provider`
    Throttled {
        provider: String,
        rate_per_second: f64,
        capacity: f64,
    },
}

impl RatePolicy {
    /// Build the token bucket for this policy, if any
    pub fn build_limiter(&self) -> Result<Option<TokenBucket>, LimiterError> {
        match self {
            RatePolicy::Unthrottled => Ok(None),
            RatePolicy::Throttled {
                provider,
                rate_per_second,
                capacity,
            } => TokenBucket::with_capacity(provider.clone(), *rate_per_second, *capacity).map(Some),
        }
    }
}

/// Classifies a request key into a rate-limit policy
pub trait ProviderClassifier: Send + Sync {
    fn classify(&self, key: &str) -> RatePolicy;
}

/// Classifier that never throttles
#[derive(Debug, Clone, Copy, Default)]
pub struct Unthrottled;

impl ProviderClassifier for Unthrottled {
    fn classify(&self, _key: &str) -> RatePolicy {
        RatePolicy::Unthrottled
    }
}

/// Classifier keyed on the first `:`-separated segment of the request key
#[derive(Debug, Clone, Default)]
pub struct PrefixClassifier {
    providers: HashMap<String, ProviderConfig>,
}

impl PrefixClassifier {
    /// Build from provider configs; later entries win on duplicate prefixes
    pub fn new(providers: &[ProviderConfig]) -> Result<Self, LimiterError> {
        debug!(count = providers.len(), "PrefixClassifier::new: called");
        let mut map = HashMap::new();
        for provider in providers {
            if !provider.rate_per_second.is_finite() || provider.rate_per_second <= 0.0 {
                return Err(LimiterError::InvalidRate(provider.rate_per_second));
            }
            match provider.burst {
                Some(burst) if !burst.is_finite() || burst < 1.0 => {
                    return Err(LimiterError::InvalidCapacity(burst));
                }
                _ => {}
            }
            map.insert(provider.prefix.to_uppercase(), provider.clone());
        }
        Ok(Self { providers: map })
    }

    /// Provider name for a key (its first segment, uppercased)
    pub fn provider_of(key: &str) -> String {
        key.split(':').next().unwrap_or_default().to_uppercase()
    }
}

impl ProviderClassifier for PrefixClassifier {
    fn classify(&self, key: &str) -> RatePolicy {
        let provider = Self::provider_of(key);
        match self.providers.get(&provider) {
            Some(config) => RatePolicy::Throttled {
                provider,
                rate_per_second: config.rate_per_second,
                capacity: config.burst.unwrap_or(config.rate_per_second.max(1.0)),
            },
            None => RatePolicy::Unthrottled,
        }
    }
}
