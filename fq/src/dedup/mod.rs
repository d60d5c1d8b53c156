//! Request deduplication and result caching
//!
//! Identical keys share one execution while it is unsettled, and successful
//! results are served from a short-lived cache until it expires or is cleared.

mod cache;
mod inflight;

use std::any::Any;
use std::sync::Arc;

use crate::error::SchedulerError;

pub(crate) use cache::ResultCache;
pub(crate) use inflight::{InFlightTable, deliver};

/// Type-erased result shared between every caller of a key
pub(crate) type SharedValue = Arc<dyn Any + Send + Sync>;

/// What a caller attached to a key eventually receives
pub(crate) type Outcome = Result<SharedValue, SchedulerError>;
