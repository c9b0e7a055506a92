//! Lifecycle event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

/// Fields carried by every lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub execution_id: String,
    pub subagent_type: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn now(execution_id: impl Into<String>, subagent_type: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            subagent_type: subagent_type.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One event in an execution's lifecycle: `start, step*, (finish | error)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubagentEvent {
    Start {
        #[serde(flatten)]
        meta: EventMeta,
        prompt: String,
    },
    Step {
        #[serde(flatten)]
        meta: EventMeta,
        /// 1-based step index within the execution
        step: usize,
        data: Value,
    },
    Finish {
        #[serde(flatten)]
        meta: EventMeta,
        result: Value,
    },
    Error {
        #[serde(flatten)]
        meta: EventMeta,
        kind: ErrorKind,
        message: String,
    },
}

impl SubagentEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            SubagentEvent::Start { meta, .. }
            | SubagentEvent::Step { meta, .. }
            | SubagentEvent::Finish { meta, .. }
            | SubagentEvent::Error { meta, .. } => meta,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.meta().execution_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.meta().timestamp
    }

    /// `finish` or `error`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubagentEvent::Finish { .. } | SubagentEvent::Error { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SubagentEvent::Start { .. } => "start",
            SubagentEvent::Step { .. } => "step",
            SubagentEvent::Finish { .. } => "finish",
            SubagentEvent::Error { .. } => "error",
        }
    }

    /// Error kind for `error` events
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            SubagentEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Per-execution lifecycle state machine.
///
/// `NotStarted -> Started -> Running* -> Finished | Errored`; nothing follows a
/// terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    #[default]
    NotStarted,
    Started,
    Running,
    Finished,
    Errored,
}

impl ExecutionPhase {
    /// Phase reached by applying `event`, or `None` if the transition is not allowed
    pub fn advance(self, event: &SubagentEvent) -> Option<ExecutionPhase> {
        use ExecutionPhase::*;
        match (self, event) {
            (NotStarted, SubagentEvent::Start { .. }) => Some(Started),
            (Started | Running, SubagentEvent::Step { .. }) => Some(Running),
            (Started | Running, SubagentEvent::Finish { .. }) => Some(Finished),
            (Started | Running, SubagentEvent::Error { .. }) => Some(Errored),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionPhase::Finished | ExecutionPhase::Errored)
    }
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPhase::NotStarted => write!(f, "not_started"),
            ExecutionPhase::Started => write!(f, "started"),
            ExecutionPhase::Running => write!(f, "running"),
            ExecutionPhase::Finished => write!(f, "finished"),
            ExecutionPhase::Errored => write!(f, "errored"),
        }
    }
}
