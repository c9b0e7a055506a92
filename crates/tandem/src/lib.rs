//! Tandem - parallel subagent execution core
//!
//! Runs a batch of subagents spawned from a parent agent, each in a partially
//! isolated copy of the parent's state (a todo list and a virtual file map),
//! and folds their results back into the parent.
//!
//! The pieces, in the order a batch uses them:
//! - [`context::ContextIsolationBuilder`] derives one child context per task
//! - [`parallel::ParallelExecutor`] runs the tasks with bounded concurrency
//! - [`events::LifecycleEventStream`] carries `start`/`step`/`finish`/`error` events
//! - [`merge::StateMerger`] reconciles each finished child into the parent
//!
//! [`batch::run_subagent_batch`] chains all four.

pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod generation;
pub mod logging;
pub mod merge;
pub mod parallel;
pub mod state;

pub use batch::{run_subagent_batch, SubagentBatch};
pub use config::BatchConfig;
pub use context::{ContextIsolationBuilder, IsolationOptions, SubagentContext};
pub use error::{ConfigurationError, ErrorKind, GenerationError};
pub use events::{EventSubscription, LifecycleEventStream, SubagentEvent};
pub use generation::{OutputGuard, StepReporter, SubagentGenerator};
pub use merge::{MergeReport, StateMerger};
pub use parallel::{
    BatchSummary, ExecutionOptions, ExecutionUnit, Outcome, OutcomeStatus, ParallelExecutor,
    SubagentDefinition,
};
pub use state::{FileData, FileStore, StateSnapshot, TodoItem, TodoStatus};
