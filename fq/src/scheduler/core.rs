//! Scheduler implementation

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dedup::{InFlightTable, Outcome, ResultCache, SharedValue, deliver};
use crate::error::{FetchError, SchedulerError};
use crate::executor::{RetryExecutor, RetryPolicy};
use crate::limiter::{ProviderClassifier, RatePolicy, TokenBucket, Unthrottled};
use crate::priority::Priority;

use super::config::SchedulerConfig;
use super::handle::ScheduleHandle;
use super::queue::{ErasedWork, Lanes, QueueEntry, QueueState, ScheduleOptions, SchedulerStats, saturating_millis};

/// Internal state protected by mutex
struct SchedulerInner {
    /// Bounded lanes of admitted, not yet dispatched requests
    lanes: Lanes,

    /// Dispatched requests, including those waiting on a rate limiter
    active: usize,

    /// Callers per unsettled key (queued or dispatched)
    in_flight: InFlightTable,

    /// Recent successful results
    cache: ResultCache,

    /// Token bucket per throttled provider, created on first dispatch
    limiters: HashMap<String, TokenBucket>,

    /// Abort handles of dispatched tasks, by key
    running: HashMap<String, AbortHandle>,

    /// Bumped by reset; tasks from an older generation settle as no-ops
    generation: u64,

    /// Set by shutdown
    closed: bool,

    /// Statistics
    stats: SchedulerStats,
}

struct Shared {
    config: SchedulerConfig,
    classifier: Arc<dyn ProviderClassifier>,
    base_policy: RetryPolicy,
    inner: Mutex<SchedulerInner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fresh_inner(config: &SchedulerConfig, generation: u64) -> SchedulerInner {
        SchedulerInner {
            lanes: Lanes::new(config.lanes.clone(), config.max_queue_size),
            active: 0,
            in_flight: InFlightTable::default(),
            cache: ResultCache::new(config.cache_ttl(), config.cache_prune_interval()),
            limiters: HashMap::new(),
            running: HashMap::new(),
            generation,
            closed: false,
            stats: SchedulerStats::default(),
        }
    }
}

/// The Scheduler mediates every outbound provider call with admission
/// control, priority lanes, a global concurrency budget, per-provider rate
/// limiting, request deduplication and result caching.
///
/// Cloning is cheap and yields a handle to the same scheduler. Submitting
/// work spawns onto the current Tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a new scheduler with the given configuration and classifier
    ///
    /// Fails with [`SchedulerError::InvalidConfig`] if `config` does not validate.
    pub fn new(config: SchedulerConfig, classifier: Arc<dyn ProviderClassifier>) -> Result<Self, SchedulerError> {
        debug!(?config, "Scheduler::new: called");
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let base_policy = config.retry_policy();
        let inner = Shared::fresh_inner(&config, 0);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                classifier,
                base_policy,
                inner: Mutex::new(inner),
            }),
        })
    }

    /// Create a scheduler that applies no rate limits
    pub fn unthrottled(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::new(config, Arc::new(Unthrottled))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Admit a request without waiting for its result
    ///
    /// Returns synchronously: a cache hit yields a ready handle, a duplicate
    /// key joins the unsettled execution, otherwise the request is queued on
    /// its lane or rejected with [`SchedulerError::QueueOverflow`] if that
    /// lane is full. Must be called from within a Tokio runtime.
    pub fn submit<T, F, Fut>(
        &self,
        key: &str,
        work: F,
        options: impl Into<ScheduleOptions>,
    ) -> Result<ScheduleHandle<T>, SchedulerError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let options = options.into();
        debug!(%key, priority = %options.priority, "Scheduler::submit: called");
        let mut inner = self.shared.lock();

        if inner.closed {
            debug!(%key, "Scheduler::submit: scheduler closed, rejecting");
            return Err(SchedulerError::Closed);
        }

        let Some(lane) = inner.lanes.index_of(&options.priority) else {
            debug!(%key, priority = %options.priority, "Scheduler::submit: unknown lane, rejecting");
            return Err(SchedulerError::UnknownLane(options.priority.to_string()));
        };

        if options.cache {
            if let Some(value) = inner.cache.get(key, Instant::now()) {
                debug!(%key, "Scheduler::submit: cache hit");
                inner.stats.total_cache_hits += 1;
                return Ok(ScheduleHandle::ready(key, Ok(value)));
            }
        }

        if let Some(rx) = inner.in_flight.join(key) {
            debug!(%key, "Scheduler::submit: joined in-flight request");
            inner.stats.total_deduplicated += 1;
            return Ok(ScheduleHandle::waiting(key, rx));
        }

        let entry = QueueEntry {
            key: key.to_string(),
            work: erase(work),
            policy: options.resolve(&self.shared.base_policy),
            cache: options.cache,
            enqueued_at: Instant::now(),
        };

        let depth = match inner.lanes.try_push(lane, entry) {
            Ok(depth) => depth,
            Err(_rejected) => {
                let limit = inner.lanes.limit();
                inner.stats.total_rejected += 1;
                warn!(%key, lane = %options.priority, limit, "Scheduler::submit: lane full, rejecting");
                return Err(SchedulerError::QueueOverflow {
                    lane: options.priority,
                    limit,
                });
            }
        };

        let rx = inner.in_flight.register(key);
        inner.stats.total_scheduled += 1;
        let total = inner.lanes.total();
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(total);
        debug!(%key, lane = %options.priority, depth, "Scheduler::submit: queued");

        self.pump(&mut inner);
        Ok(ScheduleHandle::waiting(key, rx))
    }

    /// Submit a request and wait for its result
    pub async fn schedule<T, F, Fut>(&self, key: &str, work: F, priority: Priority) -> Result<T, SchedulerError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.submit(key, work, priority)?.await
    }

    /// Dispatch queued entries while concurrency budget remains
    fn pump(&self, inner: &mut SchedulerInner) {
        while inner.active < self.shared.config.max_concurrent {
            let Some((lane, entry)) = inner.lanes.pop_next() else {
                break;
            };

            inner.active += 1;
            inner.stats.peak_concurrent = inner.stats.peak_concurrent.max(inner.active);
            inner.stats.total_wait_time_ms = inner
                .stats
                .total_wait_time_ms
                .saturating_add(saturating_millis(entry.enqueued_at.elapsed()));

            let key = entry.key.clone();
            debug!(
                %key,
                lane = %inner.lanes.name(lane),
                active = inner.active,
                "Scheduler::pump: dispatching"
            );

            let limiter = self.limiter_for(inner, &key);
            let task = tokio::spawn(run_dispatched(self.clone(), entry, limiter, inner.generation));
            inner.running.insert(key, task.abort_handle());
        }
    }

    /// Token bucket for the key's provider, created on first use
    ///
    /// A throttled provider whose bucket cannot be built is an error, never a
    /// silent pass-through.
    fn limiter_for(&self, inner: &mut SchedulerInner, key: &str) -> Result<Option<TokenBucket>, SchedulerError> {
        let policy = self.shared.classifier.classify(key);
        let RatePolicy::Throttled { provider, .. } = &policy else {
            return Ok(None);
        };
        if let Some(bucket) = inner.limiters.get(provider) {
            return Ok(Some(bucket.clone()));
        }
        match policy.build_limiter() {
            Ok(Some(bucket)) => {
                info!(%provider, rate = bucket.rate(), capacity = bucket.capacity(), "Scheduler::limiter_for: created limiter");
                inner.limiters.insert(provider.clone(), bucket.clone());
                Ok(Some(bucket))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(%provider, %key, error = %e, "Scheduler::limiter_for: invalid rate policy, failing request");
                Err(SchedulerError::LimiterUnavailable {
                    provider: provider.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Record the outcome of a dispatched entry and wake its callers
    fn settle(&self, key: &str, generation: u64, outcome: Outcome, cache: bool) {
        let callers = {
            let mut inner = self.shared.lock();
            if inner.generation != generation {
                debug!(%key, "Scheduler::settle: stale generation, ignoring");
                return;
            }

            inner.running.remove(key);
            inner.active = inner.active.saturating_sub(1);

            let now = Instant::now();
            match &outcome {
                Ok(value) => {
                    inner.stats.total_completed += 1;
                    if cache {
                        inner.cache.insert(key, value.clone(), now);
                    }
                    debug!(%key, active = inner.active, "Scheduler::settle: succeeded");
                }
                Err(e) => {
                    inner.stats.total_failed += 1;
                    warn!(%key, error = %e, active = inner.active, "Scheduler::settle: failed");
                }
            }
            inner.cache.maybe_prune(now);

            let callers = inner.in_flight.take(key);
            self.pump(&mut inner);
            callers
        };

        deliver(callers, outcome);
    }

    /// Invalidate every cached result
    ///
    /// Queued and in-flight requests are untouched.
    pub fn clear_cache(&self) {
        let mut inner = self.shared.lock();
        debug!(cached = inner.cache.len(), "Scheduler::clear_cache: called");
        inner.cache.clear();
    }

    /// Drop expired cache entries now, returning how many were removed
    pub fn prune_cache(&self) -> usize {
        self.shared.lock().cache.prune(Instant::now())
    }

    /// Return the scheduler to its initial state
    ///
    /// Running work is aborted, queued entries are dropped, limiter waiters
    /// are released, and every outstanding caller receives
    /// [`SchedulerError::Cancelled`].
    pub fn reset(&self) {
        self.reset_inner(false);
    }

    /// Reset and refuse all later submissions with [`SchedulerError::Closed`]
    pub fn shutdown(&self) {
        self.reset_inner(true);
    }

    fn reset_inner(&self, close: bool) {
        let (pending, limiters) = {
            let mut inner = self.shared.lock();
            let generation = inner.generation + 1;
            let mut old = std::mem::replace(&mut *inner, Shared::fresh_inner(&self.shared.config, generation));
            inner.closed = close || old.closed;

            for (_, task) in old.running.drain() {
                task.abort();
            }
            let dropped = old.lanes.clear().len();
            info!(
                dropped,
                active = old.active,
                in_flight = old.in_flight.len(),
                closed = inner.closed,
                "Scheduler::reset: called"
            );
            (old.in_flight.drain(), old.limiters)
        };

        for bucket in limiters.values() {
            bucket.close();
        }
        for (key, callers) in pending {
            deliver(callers, Err(SchedulerError::Cancelled { key }));
        }
    }

    /// Number of dispatched requests
    pub fn active_count(&self) -> usize {
        self.shared.lock().active
    }

    /// Number of entries waiting on a lane; `None` for an unknown lane
    pub fn lane_len(&self, priority: &Priority) -> Option<usize> {
        let inner = self.shared.lock();
        inner.lanes.index_of(priority).map(|index| inner.lanes.len_of(index))
    }

    /// Get current queue state
    pub fn queue_state(&self) -> QueueState {
        let inner = self.shared.lock();
        QueueState {
            active: inner.active,
            queued: inner.lanes.depths(),
            in_flight: inner.in_flight.len(),
            cached: inner.cache.len(),
            stats: inner.stats.clone(),
        }
    }

    /// Get the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats.clone()
    }

    /// Limiter for a provider, if one has been created
    ///
    /// `provider` is matched exactly against the name the classifier reported.
    pub fn limiter(&self, provider: &str) -> Option<TokenBucket> {
        self.shared.lock().limiters.get(provider).cloned()
    }
}

/// Box a typed unit of work behind a type-erased callable
fn erase<T, F, Fut>(work: F) -> ErasedWork
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = work();
        async move { fut.await.map(|value| Arc::new(value) as SharedValue) }.boxed()
    })
}

/// Body of a dispatched entry: executor (one token per attempt), settlement
async fn run_dispatched(
    scheduler: Scheduler,
    entry: QueueEntry,
    limiter: Result<Option<TokenBucket>, SchedulerError>,
    generation: u64,
) {
    let QueueEntry {
        key,
        work,
        policy,
        cache,
        ..
    } = entry;

    let attempt = async {
        let limiter = limiter?;
        debug!(%key, throttled = limiter.is_some(), "run_dispatched: starting work");
        RetryExecutor::new(policy)
            .with_limiter(limiter)
            .run(&key, || work())
            .await
    };

    let outcome = match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(%key, "run_dispatched: work panicked");
            Err(SchedulerError::Panicked { key: key.clone() })
        }
    };

    scheduler.settle(&key, generation, outcome, cache);
}
