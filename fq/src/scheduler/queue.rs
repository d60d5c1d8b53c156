//! Queue types for the scheduler

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::time::Instant;

use crate::dedup::SharedValue;
use crate::error::FetchError;
use crate::executor::RetryPolicy;
use crate::priority::Priority;

/// Type-erased unit of work; called once per attempt
pub(crate) type ErasedWork = Arc<dyn Fn() -> BoxFuture<'static, Result<SharedValue, FetchError>> + Send + Sync>;

/// Per-request options
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOptions {
    pub priority: Priority,

    /// Overrides the configured per-attempt timeout
    pub timeout: Option<Duration>,

    /// Overrides the configured retry bound
    pub max_retries: Option<u32>,

    /// Serve from and populate the result cache for this key
    pub cache: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            priority: Priority::NORMAL,
            timeout: None,
            max_retries: None,
            cache: true,
        }
    }
}

impl ScheduleOptions {
    pub fn priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Apply the overrides on top of the configured policy
    pub(crate) fn resolve(&self, base: &RetryPolicy) -> RetryPolicy {
        let mut policy = base.clone();
        if let Some(timeout) = self.timeout {
            policy.timeout = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        policy
    }
}

impl From<Priority> for ScheduleOptions {
    fn from(priority: Priority) -> Self {
        Self::priority(priority)
    }
}

/// An admitted request waiting for a concurrency slot
pub(crate) struct QueueEntry {
    pub key: String,
    pub work: ErasedWork,
    pub policy: RetryPolicy,
    pub cache: bool,
    pub enqueued_at: Instant,
}

/// Bounded FIFO lanes, dispatched in strict lane order
///
/// The first lane always wins; a steady stream of high-priority work can
/// starve lower lanes.
pub(crate) struct Lanes {
    names: Vec<Priority>,
    queues: Vec<VecDeque<QueueEntry>>,
    limit: usize,
}

impl Lanes {
    pub(crate) fn new(names: Vec<Priority>, limit: usize) -> Self {
        let queues = names.iter().map(|_| VecDeque::new()).collect();
        Self { names, queues, limit }
    }

    pub(crate) fn index_of(&self, priority: &Priority) -> Option<usize> {
        self.names.iter().position(|name| name == priority)
    }

    pub(crate) fn name(&self, index: usize) -> &Priority {
        &self.names[index]
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    /// Append to a lane, handing the entry back if the lane is full
    ///
    /// The incoming entry is the one rejected; already queued entries are
    /// never evicted. Dropping the oldest entry instead is an unconfirmed
    /// alternative policy.
    pub(crate) fn try_push(&mut self, index: usize, entry: QueueEntry) -> Result<usize, QueueEntry> {
        let queue = &mut self.queues[index];
        if queue.len() >= self.limit {
            return Err(entry);
        }
        queue.push_back(entry);
        Ok(queue.len())
    }

    /// Next entry: front of the first non-empty lane
    pub(crate) fn pop_next(&mut self) -> Option<(usize, QueueEntry)> {
        self.queues
            .iter_mut()
            .enumerate()
            .find_map(|(index, queue)| queue.pop_front().map(|entry| (index, entry)))
    }

    pub(crate) fn len_of(&self, index: usize) -> usize {
        self.queues[index].len()
    }

    pub(crate) fn total(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub(crate) fn depths(&self) -> Vec<(Priority, usize)> {
        self.names
            .iter()
            .cloned()
            .zip(self.queues.iter().map(VecDeque::len))
            .collect()
    }

    /// Empty every lane, returning the removed entries
    pub(crate) fn clear(&mut self) -> Vec<QueueEntry> {
        self.queues.iter_mut().flat_map(|queue| queue.drain(..)).collect()
    }
}

/// Whole milliseconds in `duration`, clamped to `u64::MAX`
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    pub total_deduplicated: u64,
    pub total_cache_hits: u64,
    pub total_wait_time_ms: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

/// Snapshot of scheduler state
#[derive(Debug, Clone, Serialize)]
pub struct QueueState {
    pub active: usize,
    pub queued: Vec<(Priority, usize)>,
    pub in_flight: usize,
    pub cached: usize,
    pub stats: SchedulerStats,
}

impl QueueState {
    pub fn total_queued(&self) -> usize {
        self.queued.iter().map(|(_, len)| len).sum()
    }
}
