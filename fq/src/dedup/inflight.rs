//! Table of keys with an unsettled execution

use std::collections::HashMap;

use tokio::sync::oneshot;

use super::Outcome;

/// At most one entry per key; every caller attached to a key receives the
/// same outcome when the underlying work settles.
#[derive(Default)]
pub(crate) struct InFlightTable {
    entries: HashMap<String, Vec<oneshot::Sender<Outcome>>>,
}

impl InFlightTable {
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Register a caller for a key, creating the entry if needed
    pub(crate) fn register(&mut self, key: &str) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.entries.entry(key.to_string()).or_default().push(tx);
        rx
    }

    /// Attach another caller to an existing key; `None` if the key is not registered
    pub(crate) fn join(&mut self, key: &str) -> Option<oneshot::Receiver<Outcome>> {
        let callers = self.entries.get_mut(key)?;
        let (tx, rx) = oneshot::channel();
        callers.push(tx);
        Some(rx)
    }

    /// Remove a key, handing back every caller waiting on it
    pub(crate) fn take(&mut self, key: &str) -> Vec<oneshot::Sender<Outcome>> {
        self.entries.remove(key).unwrap_or_default()
    }

    /// Remove every key
    pub(crate) fn drain(&mut self) -> Vec<(String, Vec<oneshot::Sender<Outcome>>)> {
        self.entries.drain().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Send one outcome to every caller; callers that stopped listening are ignored
pub(crate) fn deliver(callers: Vec<oneshot::Sender<Outcome>>, outcome: Outcome) {
    for tx in callers {
        let _ = tx.send(outcome.clone());
    }
}
