//! Error taxonomy
//!
//! Only [`ConfigurationError`] ever escapes a batch run. Every per-task failure is
//! recovered into an [`Outcome`](crate::parallel::Outcome) and reported on the
//! lifecycle event stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for configuration checks
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

/// Result type alias for generation calls
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Invalid executor or batch configuration. Fatal, raised before any task starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// `max_concurrency` was zero
    #[error("max concurrency must be a positive integer")]
    ZeroConcurrency,

    /// A per-task timeout of zero can never be met
    #[error("per-task timeout must be greater than zero")]
    ZeroTimeout,

    /// Tasks and contexts must be parallel sequences
    #[error("got {tasks} tasks but {contexts} contexts")]
    ContextCountMismatch { tasks: usize, contexts: usize },

    /// Two units in one batch share an execution id
    #[error("duplicate execution id in batch: {0}")]
    DuplicateExecutionId(String),

    /// A batch runs at most once
    #[error("batch has already been run")]
    BatchAlreadyRun,

    /// Config file or environment value could not be interpreted
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Config file could not be read
    #[error("failed to read configuration: {0}")]
    Io(String),
}

/// Failure reported by the generation collaborator for a single task
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The collaborator failed to produce a result
    #[error("generation failed: {0}")]
    Failed(String),

    /// The output guardrail rejected the result
    #[error("output rejected: {0}")]
    Rejected(String),

    /// The collaborator panicked
    #[error("generation panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GenerationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Error kind reported on the event stream for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Rejected(_) => ErrorKind::Guardrail,
            _ => ErrorKind::Generation,
        }
    }
}

/// Discriminant carried by `error` events and failed outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The collaborator failed
    Generation,
    /// The per-task deadline elapsed
    Timeout,
    /// Batch cancellation or fail-fast aborted the task
    Cancelled,
    /// The output guardrail rejected the result
    Guardrail,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Generation => write!(f, "generation"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Guardrail => write!(f, "guardrail"),
        }
    }
}

/// An irreconcilable todo entry found while merging a child back into its parent.
/// The entry is skipped; the merge carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeConflictError {
    #[error("todo item has an empty id")]
    EmptyTodoId,

    #[error("corrupt todo item {id}: {reason}")]
    CorruptTodo { id: String, reason: String },
}
