//! Caller-side handle for a scheduled request

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::dedup::{Outcome, SharedValue};
use crate::error::SchedulerError;

enum HandleState {
    Ready(Option<Outcome>),
    Waiting(oneshot::Receiver<Outcome>),
}

/// Resolves to the result of a scheduled request
///
/// Callers deduplicated onto the same key each hold their own handle and
/// all observe the same outcome.
#[must_use = "a ScheduleHandle does nothing unless awaited"]
pub struct ScheduleHandle<T> {
    key: String,
    state: HandleState,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScheduleHandle<T> {
    pub(crate) fn ready(key: &str, outcome: Outcome) -> Self {
        Self {
            key: key.to_string(),
            state: HandleState::Ready(Some(outcome)),
            _marker: PhantomData,
        }
    }

    pub(crate) fn waiting(key: &str, rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            key: key.to_string(),
            state: HandleState::Waiting(rx),
            _marker: PhantomData,
        }
    }

    /// Request key this handle waits on
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the result was available at submission (cache hit)
    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }
}

impl<T> std::fmt::Debug for ScheduleHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleHandle")
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .finish()
    }
}

fn downcast<T: Clone + 'static>(key: &str, value: SharedValue) -> Result<T, SchedulerError> {
    (*value)
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| SchedulerError::TypeMismatch { key: key.to_string() })
}

impl<T: Clone + Send + Sync + 'static> Future for ScheduleHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.state {
            HandleState::Ready(slot) => slot.take().unwrap_or_else(|| {
                Err(SchedulerError::Cancelled {
                    key: this.key.clone(),
                })
            }),
            HandleState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(outcome)) => outcome,
                // Sender dropped without a result: the scheduler went away
                Poll::Ready(Err(_)) => Err(SchedulerError::Cancelled {
                    key: this.key.clone(),
                }),
            },
        };
        Poll::Ready(outcome.and_then(|value| downcast(&this.key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[tokio::test]
    async fn test_ready_handle() {
        let handle: ScheduleHandle<u32> = ScheduleHandle::ready("K", Ok(Arc::new(3u32)));
        assert!(handle.is_ready());
        assert_eq!(handle.await, Ok(3));
    }

    #[tokio::test]
    async fn test_waiting_handle() {
        let (tx, rx) = oneshot::channel();
        let handle: ScheduleHandle<String> = ScheduleHandle::waiting("K", rx);
        assert!(!handle.is_ready());
        tx.send(Ok(Arc::new("hello".to_string()))).unwrap();
        assert_eq!(handle.await, Ok("hello".to_string()));
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let handle: ScheduleHandle<String> = ScheduleHandle::ready("K", Ok(Arc::new(1u8)));
        assert_eq!(handle.await, Err(SchedulerError::TypeMismatch { key: "K".to_string() }));
    }

    #[tokio::test]
    async fn test_dropped_sender_is_cancellation() {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let handle: ScheduleHandle<u8> = ScheduleHandle::waiting("K", rx);
        drop(tx);
        assert_eq!(handle.await, Err(SchedulerError::Cancelled { key: "K".to_string() }));
    }
}
