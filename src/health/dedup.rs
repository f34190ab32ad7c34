//! At-most-once suppression of maintenance notices per inbound message.

use std::collections::HashSet;
use std::sync::Mutex;

/// Default key-set size that triggers a full clear.
const DEFAULT_CEILING: usize = 100;

/// Tracks which inbound messages already received a maintenance notice.
///
/// Growth is bounded by a full-clear sweep once the set passes its ceiling.
/// The sweep is approximate on purpose: a false negative afterwards costs one
/// duplicate notice, it never suppresses a genuine first-time notice.
#[derive(Debug)]
pub struct DedupGuard {
    keys: Mutex<HashSet<String>>,
    ceiling: usize,
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING)
    }
}

impl DedupGuard {
    pub fn new(ceiling: usize) -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
            ceiling,
        }
    }

    /// Composite key for one inbound message.
    pub fn key(message_id: &str, person_id: &str, room_id: &str) -> String {
        format!("{message_id}:{person_id}:{room_id}")
    }

    /// Whether this key is being seen for the first time. Inserts on first
    /// sighting and sweeps when the set passes the ceiling.
    pub fn first_sighting(&self, key: &str) -> bool {
        let mut keys = self.keys.lock().expect("dedup key set lock poisoned");
        if keys.contains(key) {
            return false;
        }
        keys.insert(key.to_string());
        if keys.len() > self.ceiling {
            tracing::debug!(tracked = keys.len(), "dedup ceiling reached, clearing key set");
            keys.clear();
        }
        true
    }

    /// Clear the key set if it has grown past the ceiling.
    pub fn sweep(&self) {
        let mut keys = self.keys.lock().expect("dedup key set lock poisoned");
        if keys.len() > self.ceiling {
            tracing::debug!(tracked = keys.len(), "dedup sweep cleared key set");
            keys.clear();
        }
    }

    /// Drop a single key, re-enabling its notice.
    pub fn forget(&self, key: &str) {
        self.keys
            .lock()
            .expect("dedup key set lock poisoned")
            .remove(key);
    }

    /// Drop every tracked key (recovery signal or admin reset).
    pub fn clear(&self) {
        self.keys
            .lock()
            .expect("dedup key set lock poisoned")
            .clear();
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.keys.lock().expect("dedup key set lock poisoned").len()
    }
}
