//! Retry/timeout executor for dispatched work

mod policy;
mod runner;

pub use policy::{BackoffStrategy, RetryConfig, RetryPolicy};
pub use runner::RetryExecutor;
