use std::sync::atomic::{AtomicU64, Ordering};

use drill_core::OperationKind;
use serde::Serialize;

/// Running success/failure totals per operation kind, shared by every loop.
#[derive(Debug, Default)]
pub struct OperationCounters {
    create: KindCounters,
    read: KindCounters,
    query: KindCounters,
}

#[derive(Debug, Default)]
struct KindCounters {
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Totals after an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountSnapshot {
    pub successes: u64,
    pub failures: u64,
}

impl CountSnapshot {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }
}

impl OperationCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn kind(&self, kind: OperationKind) -> &KindCounters {
        match kind {
            OperationKind::Create => &self.create,
            OperationKind::Read => &self.read,
            OperationKind::Query => &self.query,
        }
    }

    /// Counts a success and returns the totals including it.
    pub fn record_success(&self, kind: OperationKind) -> CountSnapshot {
        let counters = self.kind(kind);
        let successes = counters.successes.fetch_add(1, Ordering::Relaxed) + 1;
        CountSnapshot {
            successes,
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Counts a failure and returns the totals including it.
    pub fn record_failure(&self, kind: OperationKind) -> CountSnapshot {
        let counters = self.kind(kind);
        let failures = counters.failures.fetch_add(1, Ordering::Relaxed) + 1;
        CountSnapshot {
            successes: counters.successes.load(Ordering::Relaxed),
            failures,
        }
    }

    #[must_use]
    pub fn snapshot(&self, kind: OperationKind) -> CountSnapshot {
        let counters = self.kind(kind);
        CountSnapshot {
            successes: counters.successes.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        }
    }
}
