//! Bounded window of recently processed message keys.

use std::collections::{HashSet, VecDeque};

/// FIFO-evicting set of the last `capacity` keys seen.
///
/// Duplicates are repeated keys, not repeated content: two messages with the
/// same text but different server ids are both delivered.
#[derive(Debug)]
pub struct ProcessedMessageWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl ProcessedMessageWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            seen: HashSet::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Record `key`. Returns `false` if it was already inside the window.
    pub fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}
