//! Deduplication of repeated log lines.

use std::collections::HashSet;
use std::hash::Hash;

/// Remembers which values have already been logged.
///
/// Owned by whoever emits the log line, so the dedup state lives and dies with it.
#[derive(Debug, Clone)]
pub struct LogOnce<T> {
    seen: HashSet<T>,
}

impl<T> Default for LogOnce<T> {
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }
}

impl<T: Eq + Hash> LogOnce<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `value` is seen.
    pub fn first_time(&mut self, value: T) -> bool {
        self.seen.insert(value)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
