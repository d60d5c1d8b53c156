//! Error types surfaced by the scheduler and by units of work

use std::time::Duration;
use thiserror::Error;

use crate::priority::Priority;

/// Errors returned by a unit of work (the provider call itself)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error {code}: {message}")]
    Provider { code: String, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl FetchError {
    /// Check if this error is transient and worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http { status, .. } => is_retryable_status(*status),
            FetchError::Network(_) => true,
            FetchError::Provider { .. } => false,
            FetchError::InvalidResponse(_) => false,
            FetchError::Validation(_) => false,
        }
    }

    /// HTTP status code, if this error carries one
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Errors surfaced to callers of the scheduler
///
/// Every variant is `Clone` because a single outcome is fanned out to all
/// callers that were deduplicated onto the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("QueueOverflow: lane '{lane}' is full ({limit} entries)")]
    QueueOverflow { lane: Priority, limit: usize },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<SchedulerError> },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Unknown lane: {0}")]
    UnknownLane(String),

    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error("Rate limiter for '{provider}' could not be built: {reason}")]
    LimiterUnavailable { provider: String, reason: String },

    #[error("Request '{key}' was cancelled by a scheduler reset")]
    Cancelled { key: String },

    #[error("Scheduler is shut down")]
    Closed,

    #[error("Result for '{key}' does not have the requested type")]
    TypeMismatch { key: String },

    #[error("Work for '{key}' panicked")]
    Panicked { key: String },
}

impl SchedulerError {
    /// Check if this is a queue overflow (backpressure) rejection
    pub fn is_overflow(&self) -> bool {
        matches!(self, SchedulerError::QueueOverflow { .. })
    }

    /// Check if a failed attempt with this error may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Timeout(_) => true,
            SchedulerError::Fetch(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// The innermost error, unwrapping retry exhaustion
    pub fn root_cause(&self) -> &SchedulerError {
        match self {
            SchedulerError::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

/// Errors from the per-provider token bucket
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimiterError {
    #[error("Rate must be positive, got {0}")]
    InvalidRate(f64),

    #[error("Capacity must be at least 1, got {0}")]
    InvalidCapacity(f64),

    #[error("Limiter was closed while waiting for a token")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_is_retryable() {
        // 5xx errors should be retryable
        assert!(
            FetchError::Http {
                status: 502,
                message: "Bad gateway".to_string()
            }
            .is_retryable()
        );

        // Rate limited upstream should be retryable
        assert!(
            FetchError::Http {
                status: 429,
                message: "Too many requests".to_string()
            }
            .is_retryable()
        );

        // 404 should not be retried
        assert!(
            !FetchError::Http {
                status: 404,
                message: "Not found".to_string()
            }
            .is_retryable()
        );

        assert!(FetchError::Network("connection reset".to_string()).is_retryable());

        // Invalid symbol reported by the provider is fatal
        assert!(
            !FetchError::Provider {
                code: "2".to_string(),
                message: "System error".to_string()
            }
            .is_retryable()
        );
        assert!(!FetchError::Validation("bad interval".to_string()).is_retryable());
        assert!(!FetchError::InvalidResponse("not json".to_string()).is_retryable());
    }

    #[test]
    fn test_scheduler_error_is_retryable() {
        assert!(SchedulerError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(SchedulerError::Fetch(FetchError::Network("eof".to_string())).is_retryable());
        assert!(!SchedulerError::Closed.is_retryable());
        assert!(
            !SchedulerError::QueueOverflow {
                lane: Priority::NORMAL,
                limit: 100
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_overflow_message() {
        let err = SchedulerError::QueueOverflow {
            lane: Priority::NORMAL,
            limit: 100,
        };
        assert!(err.is_overflow());
        assert!(err.to_string().contains("QueueOverflow"));
    }

    #[test]
    fn test_root_cause() {
        let err = SchedulerError::RetriesExhausted {
            attempts: 2,
            last: Box::new(SchedulerError::Timeout(Duration::from_secs(1))),
        };
        assert_eq!(err.root_cause(), &SchedulerError::Timeout(Duration::from_secs(1)));

        let fatal = SchedulerError::Fetch(FetchError::Validation("x".to_string()));
        assert_eq!(fatal.root_cause(), &fatal);
    }

    #[test]
    fn test_fetch_error_status() {
        let err = FetchError::Http {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(FetchError::Network("x".to_string()).status(), None);
    }
}
