use std::fmt;
use std::time::Duration;

use drill_core::{DrillMode, OperationKind};
use serde::Serialize;

use crate::counters::{CountSnapshot, OperationCounters};

/// Summary of a finished drill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrillReport {
    pub drill_id: String,
    #[serde(serialize_with = "serialize_mode")]
    pub mode: DrillMode,
    pub creates: CountSnapshot,
    pub reads: CountSnapshot,
    pub queries: CountSnapshot,
    pub cache_size: usize,
    pub stop_condition_tripped: bool,
    pub fault_rules_submitted: usize,
    /// Slots that ran a loop.
    pub loops_launched: usize,
    /// Slots left idle because their workload was disabled.
    pub idle_slots: usize,
    /// Loops that were still running when the grace period ran out.
    pub loops_aborted: usize,
    /// Loops that ended in a panic.
    pub loop_errors: usize,
    pub cancelled_early: bool,
    pub elapsed: Duration,
}

fn serialize_mode<S: serde::Serializer>(mode: &DrillMode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(mode.as_str())
}

impl DrillReport {
    pub(crate) fn counts_from(counters: &OperationCounters) -> [CountSnapshot; 3] {
        [
            counters.snapshot(OperationKind::Create),
            counters.snapshot(OperationKind::Read),
            counters.snapshot(OperationKind::Query),
        ]
    }

    /// Total failed attempts across every operation kind.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.creates.failures + self.reads.failures + self.queries.failures
    }
}

impl fmt::Display for DrillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Drill {} ({}) complete", self.drill_id, self.mode)?;
        writeln!(
            f,
            "   Creates: {} ok / {} failed",
            self.creates.successes, self.creates.failures
        )?;
        writeln!(
            f,
            "   Reads: {} ok / {} failed",
            self.reads.successes, self.reads.failures
        )?;
        writeln!(
            f,
            "   Queries: {} ok / {} failed",
            self.queries.successes, self.queries.failures
        )?;
        writeln!(f, "   Cached targets: {}", self.cache_size)?;
        writeln!(f, "   Stop condition tripped: {}", self.stop_condition_tripped)?;
        writeln!(f, "   Fault rules submitted: {}", self.fault_rules_submitted)?;
        writeln!(
            f,
            "   Loops: {} launched, {} idle, {} aborted, {} errored",
            self.loops_launched, self.idle_slots, self.loops_aborted, self.loop_errors
        )?;
        write!(
            f,
            "   Elapsed: {}{}",
            humantime::format_duration(self.elapsed),
            if self.cancelled_early { " (cancelled early)" } else { "" }
        )
    }
}
