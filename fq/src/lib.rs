//! FetchQueue - rate-limited request scheduler for market-data providers
//!
//! Every outbound provider call goes through a [`Scheduler`], which bounds
//! how many calls run at once, how many wait, and how fast each provider is
//! hit, while collapsing identical requests into one execution.
//!
//! # Core Concepts
//!
//! - **Admission**: `submit` answers synchronously; a full lane rejects with
//!   [`SchedulerError::QueueOverflow`] instead of growing without bound
//! - **Priority lanes**: higher lanes always dispatch first, FIFO within a lane
//! - **Rate limiting**: one token bucket per provider, keyed by request prefix
//! - **Deduplication**: callers of an unsettled key share its outcome
//! - **Caching**: successes are served for a short TTL until cleared
//!
//! # Modules
//!
//! - [`scheduler`] - Admission, lanes, dispatch and settlement
//! - [`limiter`] - Token buckets and provider classification
//! - [`executor`] - Per-attempt timeout and classified retries
//! - [`error`] - Error types
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//! - [`simulate`] - Synthetic load for the `fq` binary

pub mod cli;
pub mod config;
mod dedup;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod priority;
pub mod scheduler;
pub mod simulate;

pub use config::Config;
pub use error::{FetchError, LimiterError, SchedulerError};
pub use executor::{BackoffStrategy, RetryConfig, RetryExecutor, RetryPolicy};
pub use limiter::{PrefixClassifier, ProviderClassifier, ProviderConfig, RatePolicy, TokenBucket, Unthrottled};
pub use priority::Priority;
pub use scheduler::{QueueState, ScheduleHandle, ScheduleOptions, Scheduler, SchedulerConfig, SchedulerStats};
