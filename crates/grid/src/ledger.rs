use std::collections::{HashSet, VecDeque};

use gridworker_core::types::JobId;

/// How many submitted job ids are remembered.
pub const DEFAULT_LEDGER_CAPACITY: usize = 1024;

/// Bounded memory of job ids already handed to `submit`.
///
/// Oldest ids are evicted first once `capacity` is reached.
#[derive(Debug)]
pub struct SubmitLedger {
    capacity: usize,
    order: VecDeque<JobId>,
    seen: HashSet<JobId>,
}

impl SubmitLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SubmitLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}
