//! Scheduler for outbound provider requests
//!
//! Admission control, priority lanes, concurrency budget, rate limiting,
//! deduplication and caching in a single component.

mod config;
mod core;
mod handle;
mod queue;

pub use config::SchedulerConfig;
pub use core::Scheduler;
pub use handle::ScheduleHandle;
pub use queue::{QueueState, ScheduleOptions, SchedulerStats};
pub(crate) use queue::saturating_millis;
