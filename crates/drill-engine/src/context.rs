//! Per-run state shared by every operation loop.

use std::sync::Arc;
use std::time::Duration;

use drill_core::{
    Attempt, ConnectionMode, ContainerRef, ItemRequestOptions, OperationKind, Outcome,
    OutcomeContext, OutcomeSink, StoreClient, StoreResult,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::TargetCache;
use crate::coordination::{SessionHandoff, StopCondition};
use crate::counters::OperationCounters;

/// Immutable facts about one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub started_at: Instant,
    pub duration: Duration,
    pub drill_id: String,
    pub connection_mode: ConnectionMode,
    pub threads: usize,
    /// Pause after every attempt.
    pub sleep_time: Duration,
    /// Continuous-mode writes; bounded only when write timeouts are enabled.
    pub write_options: ItemRequestOptions,
    /// Stop-on-first-failure writes; always bounded.
    pub bounded_write_options: ItemRequestOptions,
    pub read_options: ItemRequestOptions,
    /// Attach the handed-off session token to designated reads.
    pub session_token_on_reads: bool,
}

impl RunContext {
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.started_at + self.duration
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    #[must_use]
    pub fn deadline_reached(&self) -> bool {
        Instant::now() >= self.deadline()
    }
}

/// Everything a loop needs, shared through an `Arc`.
pub struct LoopContext {
    pub run: RunContext,
    pub client: Arc<dyn StoreClient>,
    pub sink: Arc<dyn OutcomeSink>,
    pub outcomes: OutcomeContext,
    pub target: ContainerRef,
    pub cache: TargetCache,
    pub handoff: SessionHandoff,
    pub stop: StopCondition,
    pub counters: OperationCounters,
    pub cancel: CancellationToken,
}

impl LoopContext {
    /// True until the deadline passes or the run is cancelled.
    #[must_use]
    pub fn should_continue(&self) -> bool {
        !self.cancel.is_cancelled() && !self.run.deadline_reached()
    }

    /// Writers additionally stop once the stop condition trips.
    #[must_use]
    pub fn should_continue_writing(&self) -> bool {
        self.should_continue() && !self.stop.is_tripped()
    }

    /// Sleeps one interval, waking early on cancellation.
    pub async fn pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.run.sleep_time) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Counts the attempt and hands its outcome to the sink.
    pub fn record(
        &self,
        operation: OperationKind,
        worker_id: usize,
        result: &StoreResult,
        session_token: Option<String>,
    ) {
        let attempt = |successes: u64, failures: u64| Attempt {
            worker_id,
            successes,
            failures,
            run_time_remaining: self.run.remaining(),
            session_token,
        };

        let outcome = match result {
            Ok(response) => {
                let counts = self.counters.record_success(operation);
                Outcome::success(
                    &self.outcomes,
                    operation,
                    attempt(counts.successes, counts.failures),
                    response,
                )
            }
            Err(failure) => {
                let counts = self.counters.record_failure(operation);
                Outcome::failure(
                    &self.outcomes,
                    operation,
                    attempt(counts.successes, counts.failures),
                    failure,
                )
            }
        };

        self.sink.record(outcome);
    }
}
