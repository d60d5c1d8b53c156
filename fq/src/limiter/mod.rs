//! Per-provider rate limiting
//!
//! A token bucket per provider bounds request throughput independently of
//! the scheduler's global concurrency budget. Keys are mapped to providers by
//! a [`ProviderClassifier`]; keys with no configured provider pass through.

mod bucket;
mod provider;

pub use bucket::TokenBucket;
pub use provider::{PrefixClassifier, ProviderClassifier, ProviderConfig, RatePolicy, Unthrottled};
