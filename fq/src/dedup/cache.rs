//! Short-lived cache of successful results

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::SharedValue;

struct CacheEntry {
    value: SharedValue,
    cached_at: Instant,
}

/// Successful results keyed by request key, each valid for `ttl`
///
/// A cache with no TTL is disabled: lookups miss and inserts are dropped.
pub(crate) struct ResultCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Option<Duration>,
    prune_interval: Duration,
    last_prune: Instant,
}

impl ResultCache {
    pub(crate) fn new(ttl: Option<Duration>, prune_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            prune_interval,
            last_prune: Instant::now(),
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// Fresh value for `key`; an expired entry is removed and reported as a miss
    pub(crate) fn get(&mut self, key: &str, now: Instant) -> Option<SharedValue> {
        let ttl = self.ttl?;
        let fresh = match self.entries.get(key) {
            Some(entry) => now.saturating_duration_since(entry.cached_at) < ttl,
            None => return None,
        };
        if fresh {
            self.entries.get(key).map(|entry| entry.value.clone())
        } else {
            debug!(%key, "ResultCache::get: entry expired");
            self.entries.remove(key);
            None
        }
    }

    pub(crate) fn insert(&mut self, key: &str, value: SharedValue, now: Instant) {
        if self.ttl.is_none() {
            return;
        }
        self.entries.insert(key.to_string(), CacheEntry { value, cached_at: now });
    }

    /// Drop all expired entries, returning how many were removed
    pub(crate) fn prune(&mut self, now: Instant) -> usize {
        self.last_prune = now;
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.cached_at) < ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "ResultCache::prune: pruned entries");
        }
        removed
    }

    /// Prune if the prune interval has passed since the last sweep
    pub(crate) fn maybe_prune(&mut self, now: Instant) -> usize {
        if now.saturating_duration_since(self.last_prune) >= self.prune_interval {
            self.prune(now)
        } else {
            0
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
