//! Bounded FIFO cache of item ids known to exist in the store.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;

/// Capacity used by drills.
pub const DEFAULT_CAPACITY: usize = 100;

/// Fixed-capacity FIFO of ids that read and query loops pick targets from.
///
/// Writers append under a mutex; when the cache is full the oldest id is
/// evicted first. Readers never block on an empty cache, they get `None`.
#[derive(Debug)]
pub struct TargetCache {
    capacity: usize,
    ids: Mutex<VecDeque<String>>,
}

impl TargetCache {
    /// Cache holding at most `capacity` ids (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ids: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends `id`, evicting the oldest entry when full.
    pub fn add(&self, id: impl Into<String>) {
        let mut ids = self.ids.lock();
        if ids.len() >= self.capacity {
            ids.pop_front();
        }
        ids.push_back(id.into());
    }

    /// Uniformly random id, or `None` when empty.
    #[must_use]
    pub fn pick_random(&self) -> Option<String> {
        let ids = self.ids.lock();
        if ids.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..ids.len());
        ids.get(index).cloned()
    }

    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.ids.lock().len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.ids.lock().iter().cloned().collect()
    }
}

impl Default for TargetCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
