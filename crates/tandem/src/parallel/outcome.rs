//! Per-task outcomes, batch progress and batch summaries

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::merge::MergeReport;

/// Terminal status of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl OutcomeStatus {
    /// Statuses that trigger fail-fast cancellation
    pub fn trips_fail_fast(self) -> bool {
        matches!(self, OutcomeStatus::Failure | OutcomeStatus::Timeout)
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "success"),
            OutcomeStatus::Failure => write!(f, "failure"),
            OutcomeStatus::Timeout => write!(f, "timeout"),
            OutcomeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one task. Always terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub execution_id: String,
    pub subagent_type: String,
    pub status: OutcomeStatus,
    /// Result value (success only)
    pub result: Option<Value>,
    /// Error message (every other status)
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Number of step events delivered
    pub steps: usize,
    /// `None` when the task was cancelled before it was admitted
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
    #[serde(with = "crate::config::duration_millis")]
    pub duration: Duration,
    /// What the merge step did with this task's state
    pub merge: Option<MergeReport>,
}

impl Outcome {
    pub(crate) fn success(
        execution_id: impl Into<String>,
        subagent_type: impl Into<String>,
        result: Value,
    ) -> Self {
        Self::settled(execution_id, subagent_type, OutcomeStatus::Success, Some(result), None)
    }

    pub(crate) fn errored(
        execution_id: impl Into<String>,
        subagent_type: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let status = match kind {
            ErrorKind::Timeout => OutcomeStatus::Timeout,
            ErrorKind::Cancelled => OutcomeStatus::Cancelled,
            ErrorKind::Generation | ErrorKind::Guardrail => OutcomeStatus::Failure,
        };
        Self::settled(
            execution_id,
            subagent_type,
            status,
            None,
            Some((kind, message.into())),
        )
    }

    fn settled(
        execution_id: impl Into<String>,
        subagent_type: impl Into<String>,
        status: OutcomeStatus,
        result: Option<Value>,
        error: Option<(ErrorKind, String)>,
    ) -> Self {
        let (error_kind, error) = match error {
            Some((kind, message)) => (Some(kind), Some(message)),
            None => (None, None),
        };
        Self {
            execution_id: execution_id.into(),
            subagent_type: subagent_type.into(),
            status,
            result,
            error,
            error_kind,
            steps: 0,
            started_at: None,
            completed_at: Utc::now(),
            duration: Duration::ZERO,
            merge: None,
        }
    }

    pub(crate) fn timed(mut self, started_at: DateTime<Utc>, duration: Duration, steps: usize) -> Self {
        self.started_at = Some(started_at);
        self.duration = duration;
        self.steps = steps;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Snapshot of a running batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    /// Cancellation (external or fail-fast) has been triggered
    pub cancel_requested: bool,
    /// Execution ids currently running
    pub current: Vec<String>,
    pub percentage: f64,
}

impl BatchProgress {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.timed_out + self.cancelled
    }
}

/// Aggregate view over a batch's outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub success: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub total_steps: usize,
    /// Longest single task duration
    #[serde(with = "crate::config::duration_millis")]
    pub longest: Duration,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[Outcome]) -> Self {
        let count = |status: OutcomeStatus| outcomes.iter().filter(|o| o.status == status).count();
        let succeeded = count(OutcomeStatus::Success);
        Self {
            success: succeeded == outcomes.len(),
            total: outcomes.len(),
            succeeded,
            failed: count(OutcomeStatus::Failure),
            timed_out: count(OutcomeStatus::Timeout),
            cancelled: count(OutcomeStatus::Cancelled),
            total_steps: outcomes.iter().map(|o| o.steps).sum(),
            longest: outcomes
                .iter()
                .map(|o| o.duration)
                .max()
                .unwrap_or(Duration::ZERO),
        }
    }
}
