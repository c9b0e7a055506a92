//! Generation collaborator seam
//!
//! The call that actually produces a subagent's output is provided by the
//! application. The executor hands it the prompt, the child's context and the
//! subagent definition, plus a [`StepReporter`] for surfacing intermediate
//! progress as `step` events.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::SubagentContext;
use crate::error::GenerationResult;
use crate::events::{EventMeta, LifecycleEventStream, SubagentEvent};
use crate::parallel::SubagentDefinition;

/// Produces a subagent's result. Implemented by the application layer.
#[async_trait]
pub trait SubagentGenerator: Send + Sync {
    /// Run one subagent to completion.
    ///
    /// Intermediate progress goes through `steps`. The future may be dropped at
    /// any await point when the task times out or the batch is cancelled.
    async fn generate(
        &self,
        prompt: &str,
        context: &SubagentContext,
        definition: &SubagentDefinition,
        steps: &StepReporter,
    ) -> GenerationResult<Value>;
}

/// Opaque content-safety predicate applied to successful results
pub trait OutputGuard: Send + Sync {
    /// `Err(reason)` rejects the output
    fn check(&self, definition: &SubagentDefinition, output: &Value) -> Result<(), String>;
}

impl<F> OutputGuard for F
where
    F: Fn(&SubagentDefinition, &Value) -> Result<(), String> + Send + Sync,
{
    fn check(&self, definition: &SubagentDefinition, output: &Value) -> Result<(), String> {
        self(definition, output)
    }
}

/// Emits `step` events for one execution.
///
/// Clones share one counter. The index is assigned and emitted under a single
/// lock, so steps reach subscribers in index order whichever clone sends them.
#[derive(Debug, Clone)]
pub struct StepReporter {
    execution_id: String,
    subagent_type: String,
    events: Arc<LifecycleEventStream>,
    count: Arc<Mutex<usize>>,
    cancellation: CancellationToken,
}

impl StepReporter {
    pub(crate) fn new(
        execution_id: impl Into<String>,
        subagent_type: impl Into<String>,
        events: Arc<LifecycleEventStream>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            subagent_type: subagent_type.into(),
            events,
            count: Arc::new(Mutex::new(0)),
            cancellation,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Report one unit of progress.
    ///
    /// Returns the step index, or `None` when the execution has already reached
    /// a terminal event (late steps are dropped).
    pub fn step(&self, data: Value) -> Option<usize> {
        if self.cancellation.is_cancelled() {
            return None;
        }
        let mut count = self.count.lock();
        let index = *count + 1;
        let event = SubagentEvent::Step {
            meta: EventMeta::now(&self.execution_id, &self.subagent_type),
            step: index,
            data,
        };
        match self.events.emit(event) {
            Ok(()) => {
                *count = index;
                Some(index)
            }
            Err(e) => {
                debug!(execution_id = %self.execution_id, "dropping step: {}", e);
                None
            }
        }
    }

    /// Number of steps delivered so far
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Cancelled when the task times out or the batch is cancelled
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
