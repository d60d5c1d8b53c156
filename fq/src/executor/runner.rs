//! Runs a unit of work with a per-attempt deadline and classified retries

use std::future::Future;

use tracing::{debug, warn};

use crate::error::{FetchError, SchedulerError};
use crate::limiter::TokenBucket;
use crate::scheduler::saturating_millis;

use super::RetryPolicy;

/// Executes work under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,

    /// Provider bucket charged one token per attempt
    limiter: Option<TokenBucket>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, limiter: None }
    }

    /// Gate every attempt, retries included, on a token from `limiter`
    pub fn with_limiter(mut self, limiter: Option<TokenBucket>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` until it succeeds, fails fatally, or runs out of retries
    ///
    /// Each attempt first takes a token from the limiter, if any, then gets a
    /// fresh future from `work`; a timed-out attempt is dropped, which cancels
    /// it. Fatal errors pass through unchanged. When the policy allows retries
    /// and they are used up, the last failure is wrapped in
    /// [`SchedulerError::RetriesExhausted`].
    pub async fn run<T, F, Fut>(&self, key: &str, work: F) -> Result<T, SchedulerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        debug!(%key, max_attempts = self.policy.max_attempts(), "RetryExecutor::run: called");
        let mut attempt: u32 = 0;
        loop {
            // The token wait is not part of the attempt deadline
            if let Some(bucket) = &self.limiter {
                debug!(%key, attempt, provider = %bucket.name(), "RetryExecutor::run: waiting for token");
                bucket
                    .acquire()
                    .await
                    .map_err(|_| SchedulerError::Cancelled { key: key.to_string() })?;
            }

            let err = match tokio::time::timeout(self.policy.timeout, work()).await {
                Ok(Ok(value)) => {
                    debug!(%key, attempt, "RetryExecutor::run: attempt succeeded");
                    return Ok(value);
                }
                Ok(Err(err)) => SchedulerError::Fetch(err),
                Err(_) => {
                    warn!(%key, attempt, timeout = ?self.policy.timeout, "RetryExecutor::run: attempt timed out");
                    SchedulerError::Timeout(self.policy.timeout)
                }
            };

            if !err.is_retryable() {
                debug!(%key, attempt, error = %err, "RetryExecutor::run: fatal error, not retrying");
                return Err(err);
            }

            if attempt >= self.policy.max_retries {
                if self.policy.max_retries == 0 {
                    debug!(%key, error = %err, "RetryExecutor::run: retries disabled, surfacing error");
                    return Err(err);
                }
                warn!(%key, attempts = attempt + 1, error = %err, "RetryExecutor::run: retries exhausted");
                return Err(SchedulerError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                %key,
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts(),
                backoff_ms = saturating_millis(delay),
                error = %err,
                "RetryExecutor::run: retrying after transient error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::executor::RetryConfig;

    fn policy(max_retries: u32, timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(timeout_ms),
            &RetryConfig {
                max_retries,
                backoff_ms: 100,
                ..Default::default()
            },
        )
    }

    fn server_error() -> FetchError {
        FetchError::Http {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(2, 1000));
        let result = executor
            .run("K", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FetchError>(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(2, 1000));
        let start = Instant::now();
        let result = executor
            .run("K", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(server_error())
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Linear backoff: 100ms then 200ms
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(3, 1000));
        let result: Result<(), _> = executor
            .run("K", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Http {
                        status: 404,
                        message: "not found".to_string(),
                    })
                }
            })
            .await;
        assert_eq!(
            result,
            Err(SchedulerError::Fetch(FetchError::Http {
                status: 404,
                message: "not found".to_string()
            }))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_wraps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(2, 1000));
        let result: Result<(), _> = executor
            .run("K", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(server_error())
                }
            })
            .await;
        assert_eq!(
            result,
            Err(SchedulerError::RetriesExhausted {
                attempts: 3,
                last: Box::new(SchedulerError::Fetch(server_error())),
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(1, 50));
        let result: Result<(), _> = executor
            .run("K", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<Result<(), FetchError>>().await
                }
            })
            .await;
        assert_eq!(
            result,
            Err(SchedulerError::RetriesExhausted {
                attempts: 2,
                last: Box::new(SchedulerError::Timeout(Duration::from_millis(50))),
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries_surfaces_bare_error() {
        let executor = RetryExecutor::new(policy(0, 50));
        let result: Result<(), _> = executor
            .run("K", || std::future::pending::<Result<(), FetchError>>())
            .await;
        assert_eq!(result, Err(SchedulerError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_takes_a_token() {
        let bucket = TokenBucket::new("P", 1.0).unwrap();
        let executor = RetryExecutor::new(RetryPolicy::new(
            Duration::from_secs(10),
            &RetryConfig {
                max_retries: 3,
                backoff_ms: 10,
                ..Default::default()
            },
        ))
        .with_limiter(Some(bucket.clone()));

        let start = Instant::now();
        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let result: Result<(), _> = executor
            .run("P:TICKER", || {
                let attempts = attempts.clone();
                async move {
                    attempts.lock().unwrap().push(start.elapsed());
                    Err(FetchError::Http {
                        status: 429,
                        message: "too many requests".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(SchedulerError::RetriesExhausted { attempts: 4, .. })));
        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(950),
                "attempts too close at 1 req/s: {:?}",
                attempts
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_limiter_cancels_run() {
        let bucket = TokenBucket::new("P", 1.0).unwrap();
        assert!(bucket.try_acquire());
        bucket.close();

        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(policy(2, 1000)).with_limiter(Some(bucket));
        let result: Result<(), _> = executor
            .run("P:TICKER", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert_eq!(result, Err(SchedulerError::Cancelled { key: "P:TICKER".to_string() }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
