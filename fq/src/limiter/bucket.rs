//! Token bucket with a single iterative refill drain

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::LimiterError;

/// Internal state protected by mutex
#[derive(Debug)]
struct BucketState {
    /// Tokens currently available, `0 <= tokens <= capacity`
    tokens: f64,

    /// Last time elapsed refill was applied
    last_refill: Instant,

    /// Callers waiting for a token, granted strictly in arrival order
    waiters: VecDeque<oneshot::Sender<()>>,

    /// Whether the drain task is currently running
    draining: bool,

    /// Set by `close`; rejects current and future waiters
    closed: bool,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }

    /// Hand out tokens to waiters at the front of the queue
    ///
    /// Waiters whose receiver was dropped are skipped without consuming a token.
    fn grant(&mut self) -> usize {
        let mut granted = 0;
        while self.tokens >= 1.0 {
            let Some(tx) = self.waiters.pop_front() else {
                break;
            };
            if tx.send(()).is_ok() {
                self.tokens -= 1.0;
                granted += 1;
            }
        }
        granted
    }
}

#[derive(Debug)]
struct BucketShared {
    name: String,
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl BucketShared {
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-provider token bucket
///
/// Tokens refill continuously at `rate` per second up to `capacity`. Blocked
/// callers are parked in a FIFO and released by one drain task that sleeps
/// until the next token is due, so a burst of N waiters costs one timer, not N.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    shared: Arc<BucketShared>,
}

impl TokenBucket {
    /// Create a bucket whose capacity equals its rate (one second of burst)
    pub fn new(name: impl Into<String>, rate_per_second: f64) -> Result<Self, LimiterError> {
        Self::with_capacity(name, rate_per_second, rate_per_second)
    }

    /// Create a bucket with an explicit burst capacity; it starts full
    pub fn with_capacity(name: impl Into<String>, rate_per_second: f64, capacity: f64) -> Result<Self, LimiterError> {
        if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
            return Err(LimiterError::InvalidRate(rate_per_second));
        }
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(LimiterError::InvalidCapacity(capacity));
        }
        let name = name.into();
        debug!(%name, rate_per_second, capacity, "TokenBucket::new: called");
        Ok(Self {
            shared: Arc::new(BucketShared {
                name,
                rate: rate_per_second,
                capacity,
                state: Mutex::new(BucketState {
                    tokens: capacity,
                    last_refill: Instant::now(),
                    waiters: VecDeque::new(),
                    draining: false,
                    closed: false,
                }),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn rate(&self) -> f64 {
        self.shared.rate
    }

    pub fn capacity(&self) -> f64 {
        self.shared.capacity
    }

    /// Wait for one token
    ///
    /// Returns immediately when a token is available and nobody is queued
    /// ahead. Dropping the returned future gives up the place in line.
    pub async fn acquire(&self) -> Result<(), LimiterError> {
        let rx = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(LimiterError::Closed);
            }

            state.refill(Instant::now(), self.shared.rate, self.shared.capacity);
            if state.waiters.is_empty() && state.tokens >= 1.0 {
                state.tokens -= 1.0;
                trace!(name = %self.shared.name, tokens = state.tokens, "TokenBucket::acquire: granted immediately");
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(
                name = %self.shared.name,
                waiters = state.waiters.len(),
                "TokenBucket::acquire: no token, waiting"
            );

            if !state.draining {
                state.draining = true;
                tokio::spawn(drain(self.shared.clone()));
            }
            rx
        };

        rx.await.map_err(|_| LimiterError::Closed)
    }

    /// Take a token without waiting
    pub fn try_acquire(&self) -> bool {
        let mut state = self.shared.lock();
        if state.closed {
            return false;
        }
        state.refill(Instant::now(), self.shared.rate, self.shared.capacity);
        if state.waiters.is_empty() && state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return true;
        }
        false
    }

    /// Tokens available right now (after applying elapsed refill)
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.shared.lock();
        state.refill(Instant::now(), self.shared.rate, self.shared.capacity);
        state.tokens
    }

    /// Number of callers parked waiting for a token
    pub fn waiting(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// Reject every parked waiter and refuse future acquisitions
    pub fn close(&self) {
        let waiters = {
            let mut state = self.shared.lock();
            state.closed = true;
            std::mem::take(&mut state.waiters)
        };
        debug!(name = %self.shared.name, rejected = waiters.len(), "TokenBucket::close: called");
        // Dropping the senders wakes each receiver with an error
        drop(waiters);
    }
}

/// Drain loop shared by all waiters of one bucket
async fn drain(shared: Arc<BucketShared>) {
    debug!(name = %shared.name, "drain: started");
    loop {
        let wait = {
            let mut state = shared.lock();
            if state.closed {
                state.draining = false;
                state.waiters.clear();
                debug!(name = %shared.name, "drain: bucket closed, exiting");
                return;
            }

            state.refill(Instant::now(), shared.rate, shared.capacity);
            let granted = state.grant();
            if granted > 0 {
                trace!(name = %shared.name, granted, remaining = state.waiters.len(), "drain: granted tokens");
            }

            // Drop waiters that gave up so they do not hold the drain open
            while state.waiters.front().is_some_and(|tx| tx.is_closed()) {
                state.waiters.pop_front();
            }

            if state.waiters.is_empty() {
                state.draining = false;
                debug!(name = %shared.name, "drain: no waiters left, exiting");
                return;
            }

            let missing = (1.0 - state.tokens).max(0.0);
            Duration::from_secs_f64(missing / shared.rate)
        };

        tokio::time::sleep(wait).await;
    }
}
