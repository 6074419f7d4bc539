//! Per-attempt outcome records and where they go.
//!
//! Every completed store call inside a drill becomes exactly one [`Outcome`].
//! Outcomes are immutable, handed to an [`OutcomeSink`] and then dropped.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::ConnectionMode;
use crate::store::{StoreFailure, StoreResponse};

/// Kind of operation an outcome describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Read,
    Query,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every outcome of a run.
#[derive(Debug, Clone)]
pub struct OutcomeContext {
    pub drill_id: String,
    pub connection_mode: ConnectionMode,
    pub database: String,
    pub container: String,
    pub account_host: String,
    /// Runs shorter than an hour may still be warming up the client.
    pub possibly_cold_start: bool,
    pub log_diagnostics_for_success: bool,
}

/// What the loop knew when the attempt completed.
#[derive(Debug, Clone, Default)]
pub struct Attempt {
    pub worker_id: usize,
    pub successes: u64,
    pub failures: u64,
    pub run_time_remaining: Duration,
    pub session_token: Option<String>,
}

/// Record of one completed operation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub timestamp: DateTime<Utc>,
    pub operation: OperationKind,
    pub drill_id: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub worker_id: usize,
    pub status_code: u16,
    pub sub_status_code: u32,
    pub contacted_regions: String,
    pub diagnostics: Option<String>,
    pub error_message: String,
    pub connection_mode: String,
    pub database: String,
    pub container: String,
    pub account_host: String,
    pub possibly_cold_start: bool,
    #[serde(with = "crate::config::duration_serde")]
    pub run_time_remaining: Duration,
    pub latest_session_token: Option<String>,
}

impl Outcome {
    /// Record for a successful attempt. Sub-status is 0, message is empty.
    #[must_use]
    pub fn success(
        context: &OutcomeContext,
        operation: OperationKind,
        attempt: Attempt,
        response: &StoreResponse,
    ) -> Self {
        let diagnostics = context
            .log_diagnostics_for_success
            .then(|| response.diagnostics.clone());
        Self::build(
            context,
            operation,
            attempt,
            response.status_code,
            0,
            response.contacted_regions_csv(),
            diagnostics,
            String::new(),
        )
    }

    /// Record for a failed attempt. Diagnostics are always kept.
    #[must_use]
    pub fn failure(
        context: &OutcomeContext,
        operation: OperationKind,
        attempt: Attempt,
        failure: &StoreFailure,
    ) -> Self {
        let message = if failure.message.is_empty() {
            failure.to_string()
        } else {
            failure.message.clone()
        };
        Self::build(
            context,
            operation,
            attempt,
            failure.status_code,
            failure.sub_status_code,
            failure.contacted_regions_csv(),
            Some(failure.diagnostics.clone()),
            message,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        context: &OutcomeContext,
        operation: OperationKind,
        attempt: Attempt,
        status_code: u16,
        sub_status_code: u32,
        contacted_regions: String,
        diagnostics: Option<String>,
        error_message: String,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            drill_id: context.drill_id.clone(),
            success_count: attempt.successes,
            failure_count: attempt.failures,
            worker_id: attempt.worker_id,
            status_code,
            sub_status_code,
            contacted_regions,
            diagnostics,
            error_message,
            connection_mode: context.connection_mode.to_string(),
            database: context.database.clone(),
            container: context.container.clone(),
            account_host: context.account_host.clone(),
            possibly_cold_start: context.possibly_cold_start,
            run_time_remaining: attempt.run_time_remaining,
            latest_session_token: attempt.session_token,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error_message.is_empty() && self.status_code < 400
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time={} op={} drill={} successes={} failures={} worker={} status={} sub_status={} \
             regions=[{}] mode={} db={} container={} account={} cold_start={} remaining={}",
            self.timestamp.to_rfc3339(),
            self.operation,
            self.drill_id,
            self.success_count,
            self.failure_count,
            self.worker_id,
            self.status_code,
            self.sub_status_code,
            self.contacted_regions,
            self.connection_mode,
            self.database,
            self.container,
            self.account_host,
            self.possibly_cold_start,
            humantime::format_duration(self.run_time_remaining),
        )?;
        if let Some(token) = &self.latest_session_token {
            write!(f, " session_token={token}")?;
        }
        if !self.error_message.is_empty() {
            write!(f, " error={:?}", self.error_message)?;
        }
        if let Some(diagnostics) = &self.diagnostics {
            write!(f, " diagnostics={diagnostics}")?;
        }
        Ok(())
    }
}

/// Destination for outcome records.
pub trait OutcomeSink: Send + Sync {
    fn record(&self, outcome: Outcome);
}

/// Emits outcomes as structured events on the `drill::outcome` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutcomeSink for TracingSink {
    fn record(&self, outcome: Outcome) {
        let remaining = humantime::format_duration(outcome.run_time_remaining).to_string();
        let session_token = outcome.latest_session_token.as_deref().unwrap_or("");
        let diagnostics = outcome.diagnostics.as_deref().unwrap_or("");

        if outcome.is_success() {
            tracing::info!(
                target: "drill::outcome",
                timestamp = %outcome.timestamp.to_rfc3339(),
                operation = %outcome.operation,
                drill_id = %outcome.drill_id,
                success_count = outcome.success_count,
                failure_count = outcome.failure_count,
                worker_id = outcome.worker_id,
                status_code = outcome.status_code,
                sub_status_code = outcome.sub_status_code,
                contacted_regions = %outcome.contacted_regions,
                connection_mode = %outcome.connection_mode,
                database = %outcome.database,
                container = %outcome.container,
                account_host = %outcome.account_host,
                possibly_cold_start = outcome.possibly_cold_start,
                run_time_remaining = %remaining,
                session_token,
                diagnostics,
                "operation succeeded"
            );
        } else {
            tracing::error!(
                target: "drill::outcome",
                timestamp = %outcome.timestamp.to_rfc3339(),
                operation = %outcome.operation,
                drill_id = %outcome.drill_id,
                success_count = outcome.success_count,
                failure_count = outcome.failure_count,
                worker_id = outcome.worker_id,
                status_code = outcome.status_code,
                sub_status_code = outcome.sub_status_code,
                contacted_regions = %outcome.contacted_regions,
                connection_mode = %outcome.connection_mode,
                database = %outcome.database,
                container = %outcome.container,
                account_host = %outcome.account_host,
                possibly_cold_start = outcome.possibly_cold_start,
                run_time_remaining = %remaining,
                session_token,
                diagnostics,
                error = %outcome.error_message,
                "operation failed"
            );
        }
    }
}

/// Keeps outcomes in memory for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    outcomes: Mutex<Vec<Outcome>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    #[must_use]
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().clone()
    }

    #[must_use]
    pub fn of_kind(&self, operation: OperationKind) -> Vec<Outcome> {
        self.outcomes
            .lock()
            .iter()
            .filter(|outcome| outcome.operation == operation)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn failures(&self) -> Vec<Outcome> {
        self.outcomes
            .lock()
            .iter()
            .filter(|outcome| !outcome.is_success())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }
}

impl OutcomeSink for MemorySink {
    fn record(&self, outcome: Outcome) {
        self.outcomes.lock().push(outcome);
    }
}

impl<S: OutcomeSink + ?Sized> OutcomeSink for std::sync::Arc<S> {
    fn record(&self, outcome: Outcome) {
        (**self).record(outcome);
    }
}
