//! Composed batch entry point
//!
//! Chains context isolation, parallel execution and merging into one call.
//! [`SubagentBatch`] is the long form for callers that want to subscribe to
//! events, attach sinks or cancel the run from elsewhere; [`run_subagent_batch`]
//! is the one-shot form.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BatchConfig;
use crate::context::{ContextIsolationBuilder, IsolationOptions};
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::events::{spawn_sink, EventSink, EventSubscription, LifecycleEventStream};
use crate::generation::{OutputGuard, SubagentGenerator};
use crate::parallel::{BatchProgress, ExecutionOptions, ExecutionUnit, Outcome, ParallelExecutor};
use crate::state::StateSnapshot;

/// Run `tasks` as subagents of `parent` and return one outcome per task in
/// submission order.
pub async fn run_subagent_batch(
    parent: &Arc<StateSnapshot>,
    tasks: Vec<ExecutionUnit>,
    isolation: IsolationOptions,
    execution: ExecutionOptions,
    generator: Arc<dyn SubagentGenerator>,
) -> ConfigurationResult<Vec<Outcome>> {
    SubagentBatch::new(generator, isolation, execution)
        .run(parent, tasks)
        .await
}

/// One batch of subagents sharing an event stream and a cancellation token.
///
/// A batch runs once. Its event stream is closed when the run ends, which ends
/// every merged subscription. Dropping the `run` future also counts as ending
/// the run: unfinished tasks are aborted and the stream is closed.
pub struct SubagentBatch {
    builder: ContextIsolationBuilder,
    executor: ParallelExecutor,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl std::fmt::Debug for SubagentBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentBatch")
            .field("isolation", self.builder.options())
            .field("executor", &self.executor)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl SubagentBatch {
    pub fn new(
        generator: Arc<dyn SubagentGenerator>,
        isolation: IsolationOptions,
        execution: ExecutionOptions,
    ) -> Self {
        Self {
            builder: ContextIsolationBuilder::new(isolation),
            executor: ParallelExecutor::new(generator, execution),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn from_config(generator: Arc<dyn SubagentGenerator>, config: BatchConfig) -> Self {
        Self::new(generator, config.isolation, config.execution)
    }

    /// Check every successful result with `guard`
    pub fn with_guard(mut self, guard: Arc<dyn OutputGuard>) -> Self {
        self.executor = self.executor.with_guard(guard);
        self
    }

    /// Keep at most `limit` events for replay
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.executor = self
            .executor
            .with_event_stream(Arc::new(LifecycleEventStream::with_history_limit(limit)));
        self
    }

    /// Subscribe to one execution, or to all of them with `None`
    pub fn subscribe(&self, execution_id: Option<&str>) -> EventSubscription {
        self.executor.events().subscribe(execution_id)
    }

    /// Subscribe, replaying what has already been emitted first
    pub fn subscribe_with_replay(&self, execution_id: Option<&str>) -> EventSubscription {
        self.executor.events().subscribe_with_replay(execution_id)
    }

    /// Attach an event sink to every execution of this batch
    pub fn attach_sink(&self, sink: Arc<dyn EventSink>) -> JoinHandle<usize> {
        spawn_sink(&self.executor.events(), None, sink)
    }

    pub fn events(&self) -> Arc<LifecycleEventStream> {
        self.executor.events()
    }

    /// Cancelling this token cancels every task that has not finished yet
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> BatchProgress {
        self.executor.progress()
    }

    /// Build one context per task from `parent`, run them and merge back
    pub async fn run(
        &self,
        parent: &Arc<StateSnapshot>,
        tasks: Vec<ExecutionUnit>,
    ) -> ConfigurationResult<Vec<Outcome>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConfigurationError::BatchAlreadyRun);
        }

        let _close = CloseOnDrop(self.executor.events());
        let contexts = self.builder.build_many(parent, tasks.len());
        info!(
            tasks = tasks.len(),
            files = ?self.builder.options().files,
            todos = ?self.builder.options().todos,
            "running subagent batch"
        );
        self.executor
            .run(tasks, contexts, self.cancel.clone())
            .await
    }
}

struct CloseOnDrop(Arc<LifecycleEventStream>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}
