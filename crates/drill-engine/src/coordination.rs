//! Cross-loop coordination for session-consistency drills.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

/// Latest session token published by a writer.
///
/// Last write wins; readers see whatever was published most recently, which
/// may already be stale by the time their read reaches the store.
#[derive(Debug, Default)]
pub struct SessionHandoff {
    token: RwLock<String>,
}

impl SessionHandoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the published token.
    pub fn publish(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }

    /// Most recently published token; empty until the first publish.
    #[must_use]
    pub fn latest(&self) -> String {
        self.token.read().clone()
    }

    /// Latest token, or `None` before the first publish.
    #[must_use]
    pub fn latest_non_empty(&self) -> Option<String> {
        let token = self.token.read();
        (!token.is_empty()).then(|| token.clone())
    }
}

/// One-way latch that halts writers after the first availability failure.
#[derive(Debug, Default)]
pub struct StopCondition {
    tripped: AtomicBool,
}

impl StopCondition {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the latch. Returns true only for the caller that tripped it.
    pub fn trip(&self) -> bool {
        self.tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}
