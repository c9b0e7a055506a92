//! Parallel Subagent Executor
//!
//! Runs a batch of execution units against their contexts with bounded,
//! work-conserving concurrency.
//!
//! # Features
//! - Optional concurrency limit; a finished slot is backfilled immediately
//! - Per-task timeout with per-unit override
//! - External cancellation and fail-fast
//! - Panic isolation around the generation collaborator
//! - Outcomes returned in submission order
//! - Live progress snapshots

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::outcome::{BatchProgress, Outcome, OutcomeStatus};
use super::unit::ExecutionUnit;
use crate::context::SubagentContext;
use crate::error::{ConfigurationError, ConfigurationResult, ErrorKind, GenerationError};
use crate::events::{EventMeta, ExecutionPhase, LifecycleEventStream, SubagentEvent};
use crate::generation::{OutputGuard, StepReporter, SubagentGenerator};
use crate::merge::StateMerger;

/// Execution options for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    /// Maximum simultaneously running tasks; `None` is unbounded
    pub max_concurrency: Option<usize>,
    /// Deadline applied to every task that has no timeout of its own
    #[serde(with = "crate::config::serde_millis")]
    pub per_task_timeout: Option<Duration>,
    /// Cancel the rest of the batch on the first failure or timeout
    pub fail_fast: bool,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// At most `k` tasks at a time
    pub fn bounded(k: usize) -> Self {
        Self::default().with_max_concurrency(k)
    }

    /// One task at a time, stopping at the first failure
    pub fn sequential() -> Self {
        Self::bounded(1).with_fail_fast(true)
    }

    pub fn with_max_concurrency(mut self, k: usize) -> Self {
        self.max_concurrency = Some(k);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.max_concurrency = None;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_task_timeout = Some(timeout);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn validate(&self) -> ConfigurationResult<()> {
        if self.max_concurrency == Some(0) {
            return Err(ConfigurationError::ZeroConcurrency);
        }
        if self.per_task_timeout == Some(Duration::ZERO) {
            return Err(ConfigurationError::ZeroTimeout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Pending,
    Running,
    Done(OutcomeStatus),
}

#[derive(Debug, Default)]
struct ProgressTracker {
    order: Vec<String>,
    phases: HashMap<String, TaskPhase>,
    batch: Option<CancellationToken>,
}

impl ProgressTracker {
    fn reset(&mut self, units: &[ExecutionUnit], batch: CancellationToken) {
        self.order = units.iter().map(|u| u.execution_id().to_string()).collect();
        self.phases = self
            .order
            .iter()
            .map(|id| (id.clone(), TaskPhase::Pending))
            .collect();
        self.batch = Some(batch);
    }

    fn set(&mut self, execution_id: &str, phase: TaskPhase) {
        if let Some(current) = self.phases.get_mut(execution_id) {
            *current = phase;
        }
    }

    fn snapshot(&self) -> BatchProgress {
        let mut progress = BatchProgress {
            total: self.order.len(),
            cancel_requested: self.batch.as_ref().is_some_and(|b| b.is_cancelled()),
            ..BatchProgress::default()
        };
        for id in &self.order {
            match self.phases.get(id) {
                Some(TaskPhase::Pending) | None => progress.pending += 1,
                Some(TaskPhase::Running) => {
                    progress.running += 1;
                    progress.current.push(id.clone());
                }
                Some(TaskPhase::Done(OutcomeStatus::Success)) => progress.succeeded += 1,
                Some(TaskPhase::Done(OutcomeStatus::Failure)) => progress.failed += 1,
                Some(TaskPhase::Done(OutcomeStatus::Timeout)) => progress.timed_out += 1,
                Some(TaskPhase::Done(OutcomeStatus::Cancelled)) => progress.cancelled += 1,
            }
        }
        progress.percentage = if progress.total == 0 {
            100.0
        } else {
            progress.finished() as f64 / progress.total as f64 * 100.0
        };
        progress
    }
}

/// Runs execution units concurrently against their contexts
pub struct ParallelExecutor {
    generator: Arc<dyn SubagentGenerator>,
    options: ExecutionOptions,
    events: Arc<LifecycleEventStream>,
    guard: Option<Arc<dyn OutputGuard>>,
    merger: StateMerger,
    tracker: Arc<Mutex<ProgressTracker>>,
}

impl std::fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("options", &self.options)
            .field("guarded", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

impl ParallelExecutor {
    pub fn new(generator: Arc<dyn SubagentGenerator>, options: ExecutionOptions) -> Self {
        Self {
            generator,
            options,
            events: Arc::new(LifecycleEventStream::new()),
            guard: None,
            merger: StateMerger::new(),
            tracker: Arc::new(Mutex::new(ProgressTracker::default())),
        }
    }

    /// Emit lifecycle events on `events` instead of a private stream
    pub fn with_event_stream(mut self, events: Arc<LifecycleEventStream>) -> Self {
        self.events = events;
        self
    }

    /// Check every successful result with `guard`
    pub fn with_guard(mut self, guard: Arc<dyn OutputGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn events(&self) -> Arc<LifecycleEventStream> {
        Arc::clone(&self.events)
    }

    /// Progress of the current (or last) batch
    pub fn progress(&self) -> BatchProgress {
        self.tracker.lock().snapshot()
    }

    /// Run `units[i]` against `contexts[i]` for every `i`.
    ///
    /// Returns one outcome per unit in submission order. Only configuration
    /// problems fail the call, and they do so before any task starts.
    pub async fn run(
        &self,
        units: Vec<ExecutionUnit>,
        contexts: Vec<SubagentContext>,
        cancel: CancellationToken,
    ) -> ConfigurationResult<Vec<Outcome>> {
        self.options.validate()?;
        self.validate_batch(&units, &contexts)?;

        let total = units.len();
        let limit = self.options.max_concurrency.unwrap_or(total).max(1);
        let batch = cancel.child_token();
        self.tracker.lock().reset(&units, batch.clone());

        info!(
            total,
            limit,
            fail_fast = self.options.fail_fast,
            "starting subagent batch"
        );

        let worker = Arc::new(TaskWorker {
            generator: Arc::clone(&self.generator),
            events: Arc::clone(&self.events),
            guard: self.guard.clone(),
            merger: self.merger,
            default_timeout: self.options.per_task_timeout,
            tracker: Arc::clone(&self.tracker),
        });

        let labels: Vec<(String, String)> = units
            .iter()
            .map(|u| (u.execution_id().to_string(), u.subagent_type().to_string()))
            .collect();
        let mut pending: VecDeque<(usize, ExecutionUnit, Arc<SubagentContext>)> = units
            .into_iter()
            .zip(contexts)
            .enumerate()
            .map(|(index, (unit, context))| (index, unit, Arc::new(context)))
            .collect();
        let mut admitted: HashMap<Id, (usize, Arc<SubagentContext>)> = HashMap::new();
        let mut outcomes: Vec<Option<Outcome>> = vec![None; total];
        // dropping this future cancels the batch and aborts every spawned task
        let mut active = JoinSet::new();
        let cancel_on_drop = batch.clone().drop_guard();

        loop {
            while active.len() < limit && !batch.is_cancelled() {
                let Some((index, unit, context)) = pending.pop_front() else {
                    break;
                };
                debug!(execution_id = %unit.execution_id(), "admitting task");
                let handle = active.spawn(Arc::clone(&worker).execute(
                    unit,
                    Arc::clone(&context),
                    batch.clone(),
                ));
                admitted.insert(handle.id(), (index, context));
            }

            let Some(joined) = active.join_next_with_id().await else {
                break;
            };
            let id = match &joined {
                Ok((id, _)) => *id,
                Err(e) => e.id(),
            };
            let Some((index, context)) = admitted.remove(&id) else {
                continue;
            };
            let outcome = match joined {
                Ok((_, outcome)) => outcome,
                Err(e) => {
                    let (execution_id, subagent_type) = &labels[index];
                    worker.abandoned(execution_id, subagent_type, Some(context.as_ref()), e)
                }
            };

            if self.options.fail_fast && outcome.status.trips_fail_fast() && !batch.is_cancelled() {
                warn!(
                    execution_id = %outcome.execution_id,
                    status = %outcome.status,
                    "fail-fast triggered, cancelling remaining tasks"
                );
                batch.cancel();
            }
            outcomes[index] = Some(outcome);
        }
        let _ = cancel_on_drop.disarm();

        for (index, unit, context) in pending {
            outcomes[index] = Some(worker.never_admitted(unit, &context));
        }

        let outcomes: Vec<Outcome> = outcomes
            .into_iter()
            .zip(labels)
            .map(|(outcome, (execution_id, subagent_type))| {
                outcome.unwrap_or_else(|| {
                    Outcome::errored(execution_id, subagent_type, ErrorKind::Cancelled, "not run")
                })
            })
            .collect();

        let progress = self.progress();
        info!(
            total = progress.total,
            succeeded = progress.succeeded,
            failed = progress.failed,
            timed_out = progress.timed_out,
            cancelled = progress.cancelled,
            "subagent batch finished"
        );
        Ok(outcomes)
    }

    fn validate_batch(
        &self,
        units: &[ExecutionUnit],
        contexts: &[SubagentContext],
    ) -> ConfigurationResult<()> {
        if units.len() != contexts.len() {
            return Err(ConfigurationError::ContextCountMismatch {
                tasks: units.len(),
                contexts: contexts.len(),
            });
        }
        let mut seen = HashSet::new();
        for unit in units {
            if unit.timeout() == Some(Duration::ZERO) {
                return Err(ConfigurationError::ZeroTimeout);
            }
            let id = unit.execution_id();
            if !seen.insert(id) || self.events.phase(id) != ExecutionPhase::NotStarted {
                return Err(ConfigurationError::DuplicateExecutionId(id.to_string()));
            }
        }
        Ok(())
    }
}

enum Settled {
    Done(Result<Generated, Box<dyn Any + Send>>),
    TimedOut(Duration),
    Cancelled,
}

type Generated = crate::error::GenerationResult<Value>;

/// Shared per-batch state every spawned task runs with
struct TaskWorker {
    generator: Arc<dyn SubagentGenerator>,
    events: Arc<LifecycleEventStream>,
    guard: Option<Arc<dyn OutputGuard>>,
    merger: StateMerger,
    default_timeout: Option<Duration>,
    tracker: Arc<Mutex<ProgressTracker>>,
}

impl TaskWorker {
    async fn execute(
        self: Arc<Self>,
        unit: ExecutionUnit,
        context: Arc<SubagentContext>,
        batch: CancellationToken,
    ) -> Outcome {
        let execution_id = unit.execution_id().to_string();
        self.tracker.lock().set(&execution_id, TaskPhase::Running);
        self.emit(SubagentEvent::Start {
            meta: unit.event_meta(),
            prompt: unit.prompt().to_string(),
        });

        let token = batch.child_token();
        let steps = StepReporter::new(
            &execution_id,
            unit.subagent_type(),
            Arc::clone(&self.events),
            token.clone(),
        );
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = unit.timeout().or(self.default_timeout);

        let generation = AssertUnwindSafe(self.generator.generate(
            unit.prompt(),
            &context,
            unit.definition(),
            &steps,
        ))
        .catch_unwind();
        let bounded = async {
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, generation).await {
                    Ok(result) => Settled::Done(result),
                    Err(_) => Settled::TimedOut(limit),
                },
                None => Settled::Done(generation.await),
            }
        };
        let settled = tokio::select! {
            biased;
            _ = token.cancelled() => Settled::Cancelled,
            settled = bounded => settled,
        };
        // late steps from the collaborator are dropped from here on
        token.cancel();

        let outcome = match settled {
            Settled::Done(Ok(Ok(value))) => self.check_output(&unit, value),
            Settled::Done(Ok(Err(e))) => {
                Outcome::errored(&execution_id, unit.subagent_type(), e.kind(), e.to_string())
            }
            Settled::Done(Err(payload)) => {
                let e = GenerationError::Panicked(panic_message(payload.as_ref()));
                warn!(execution_id = %execution_id, "{}", e);
                Outcome::errored(&execution_id, unit.subagent_type(), e.kind(), e.to_string())
            }
            Settled::TimedOut(limit) => Outcome::errored(
                &execution_id,
                unit.subagent_type(),
                ErrorKind::Timeout,
                format!("timed out after {}ms", limit.as_millis()),
            ),
            Settled::Cancelled => Outcome::errored(
                &execution_id,
                unit.subagent_type(),
                ErrorKind::Cancelled,
                "cancelled",
            ),
        }
        .timed(started_at, clock.elapsed(), steps.count());

        self.finish(&unit, &context, outcome)
    }

    fn check_output(&self, unit: &ExecutionUnit, value: Value) -> Outcome {
        let verdict = match &self.guard {
            Some(guard) => guard.check(unit.definition(), &value),
            None => Ok(()),
        };
        match verdict {
            Ok(()) => Outcome::success(unit.execution_id(), unit.subagent_type(), value),
            Err(reason) => {
                let e = GenerationError::Rejected(reason);
                Outcome::errored(unit.execution_id(), unit.subagent_type(), e.kind(), e.to_string())
            }
        }
    }

    /// Emit the terminal event, then merge
    fn finish(&self, unit: &ExecutionUnit, context: &SubagentContext, mut outcome: Outcome) -> Outcome {
        let meta = unit.event_meta();
        let terminal = match (&outcome.result, outcome.error_kind) {
            (Some(result), None) => SubagentEvent::Finish {
                meta,
                result: result.clone(),
            },
            (_, kind) => SubagentEvent::Error {
                meta,
                kind: kind.unwrap_or(ErrorKind::Generation),
                message: outcome.error.clone().unwrap_or_default(),
            },
        };
        self.emit(terminal);

        match outcome.status {
            OutcomeStatus::Success => debug!(execution_id = %outcome.execution_id, "task succeeded"),
            status => warn!(
                execution_id = %outcome.execution_id,
                status = %status,
                error = outcome.error.as_deref().unwrap_or_default(),
                "task did not succeed"
            ),
        }

        outcome.merge = Some(self.merger.merge(context, &outcome));
        self.tracker
            .lock()
            .set(&outcome.execution_id, TaskPhase::Done(outcome.status));
        outcome
    }

    /// Outcome for a unit the batch was cancelled before admitting
    fn never_admitted(&self, unit: ExecutionUnit, context: &SubagentContext) -> Outcome {
        self.emit(SubagentEvent::Start {
            meta: unit.event_meta(),
            prompt: unit.prompt().to_string(),
        });
        let outcome = Outcome::errored(
            unit.execution_id(),
            unit.subagent_type(),
            ErrorKind::Cancelled,
            "cancelled before start",
        );
        self.finish(&unit, context, outcome)
    }

    /// Outcome for a task whose spawned future died outside the collaborator
    fn abandoned(
        &self,
        execution_id: &str,
        subagent_type: &str,
        context: Option<&SubagentContext>,
        error: JoinError,
    ) -> Outcome {
        let kind = if error.is_cancelled() {
            ErrorKind::Cancelled
        } else {
            ErrorKind::Generation
        };
        let message = if error.is_panic() {
            panic_message(error.into_panic().as_ref())
        } else {
            error.to_string()
        };
        warn!(execution_id = %execution_id, "task aborted: {}", message);

        if self.events.phase(execution_id) == ExecutionPhase::NotStarted {
            self.emit(SubagentEvent::Start {
                meta: EventMeta::now(execution_id, subagent_type),
                prompt: String::new(),
            });
        }
        if !self.events.phase(execution_id).is_terminal() {
            self.emit(SubagentEvent::Error {
                meta: EventMeta::now(execution_id, subagent_type),
                kind,
                message: message.clone(),
            });
        }

        let mut outcome = Outcome::errored(execution_id, subagent_type, kind, message);
        if let Some(context) = context {
            outcome.merge = Some(self.merger.merge(context, &outcome));
        }
        self.tracker
            .lock()
            .set(execution_id, TaskPhase::Done(outcome.status));
        outcome
    }

    fn emit(&self, event: SubagentEvent) {
        if let Err(e) = self.events.emit(event) {
            warn!("lifecycle event rejected: {}", e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextIsolationBuilder, IsolationOptions};
    use crate::parallel::SubagentDefinition;
    use crate::state::StateSnapshot;
    use async_trait::async_trait;
    use serde_json::json;

    /// Reads its behaviour from the prompt:
    /// `{"delay": ms, "steps": n, "fail": bool, "panic": bool, "write": path, "late_write": path}`
    #[derive(Default)]
    struct ScriptedGenerator {
        starts: Mutex<HashMap<String, Duration>>,
        origin: Mutex<Option<Instant>>,
    }

    impl ScriptedGenerator {
        fn started_at(&self, prompt_id: &str) -> Duration {
            self.starts.lock()[prompt_id]
        }
    }

    #[async_trait]
    impl SubagentGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &str,
            context: &SubagentContext,
            _definition: &SubagentDefinition,
            steps: &StepReporter,
        ) -> crate::error::GenerationResult<Value> {
            let script: Value = serde_json::from_str(prompt).map_err(anyhow::Error::from)?;
            let origin = *self.origin.lock().get_or_insert_with(Instant::now);
            if let Some(id) = script["id"].as_str() {
                self.starts.lock().insert(id.to_string(), origin.elapsed());
            }
            for i in 0..script["steps"].as_u64().unwrap_or(0) {
                steps.step(json!({ "i": i }));
            }
            if let Some(path) = script["write"].as_str() {
                context.state.files().write(path, vec!["hello".into()]);
            }
            tokio::time::sleep(Duration::from_millis(script["delay"].as_u64().unwrap_or(0))).await;
            if let Some(path) = script["late_write"].as_str() {
                context.state.files().write(path, vec!["late".into()]);
            }
            if script["panic"].as_bool().unwrap_or(false) {
                panic!("scripted panic");
            }
            if script["fail"].as_bool().unwrap_or(false) {
                return Err(GenerationError::failed("scripted failure"));
            }
            Ok(json!({ "echo": script["id"] }))
        }
    }

    fn batch(scripts: &[Value]) -> (Vec<ExecutionUnit>, Vec<SubagentContext>, Arc<StateSnapshot>) {
        let parent = Arc::new(StateSnapshot::new());
        let units = scripts
            .iter()
            .map(|s| ExecutionUnit::new(SubagentDefinition::new("worker"), s.to_string()))
            .collect::<Vec<_>>();
        let contexts = ContextIsolationBuilder::new(IsolationOptions::default())
            .build_many(&parent, units.len());
        (units, contexts, parent)
    }

    #[test]
    fn test_options_validation() {
        assert!(ExecutionOptions::default().validate().is_ok());
        assert_eq!(
            ExecutionOptions::bounded(0).validate(),
            Err(ConfigurationError::ZeroConcurrency)
        );
        assert_eq!(
            ExecutionOptions::new().with_timeout(Duration::ZERO).validate(),
            Err(ConfigurationError::ZeroTimeout)
        );
        let sequential = ExecutionOptions::sequential();
        assert_eq!(sequential.max_concurrency, Some(1));
        assert!(sequential.fail_fast);
        assert_eq!(ExecutionOptions::bounded(3).unbounded().max_concurrency, None);
    }

    #[test]
    fn test_options_serialize_camel_case_millis() {
        let options = ExecutionOptions::bounded(4).with_timeout(Duration::from_secs(2));
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(
            value,
            json!({ "maxConcurrency": 4, "perTaskTimeout": 2000, "failFast": false })
        );
    }

    #[tokio::test]
    async fn test_zero_concurrency_fails_before_any_task() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = ParallelExecutor::new(generator, ExecutionOptions::bounded(0));
        let (units, contexts, _) = batch(&[json!({ "id": "a" })]);
        let mut events = executor.events().subscribe(None);

        let result = executor.run(units, contexts, CancellationToken::new()).await;
        assert!(matches!(result, Err(ConfigurationError::ZeroConcurrency)));
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_context_count_mismatch() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::default(),
        );
        let (units, mut contexts, _) = batch(&[json!({}), json!({})]);
        contexts.pop();
        let result = executor.run(units, contexts, CancellationToken::new()).await;
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::ContextCountMismatch {
                tasks: 2,
                contexts: 1
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_execution_ids_rejected() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::default(),
        );
        let parent = Arc::new(StateSnapshot::new());
        let definition = SubagentDefinition::new("worker");
        let units = vec![
            ExecutionUnit::with_execution_id(definition.clone(), "{}", "same"),
            ExecutionUnit::with_execution_id(definition, "{}", "same"),
        ];
        let contexts = ContextIsolationBuilder::default().build_many(&parent, 2);
        let result = executor.run(units, contexts, CancellationToken::new()).await;
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::DuplicateExecutionId("same".into())
        );
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::bounded(2),
        );
        let outcomes = executor
            .run(Vec::new(), Vec::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(executor.progress().percentage, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill_respects_concurrency_limit() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = ParallelExecutor::new(generator.clone(), ExecutionOptions::bounded(2));
        let (units, contexts, _) = batch(&[
            json!({ "id": "t1", "delay": 100 }),
            json!({ "id": "t2", "delay": 100 }),
            json!({ "id": "t3", "delay": 50 }),
        ]);
        let ids: Vec<String> = units.iter().map(|u| u.execution_id().to_string()).collect();

        let outcomes = executor.run(units, contexts, CancellationToken::new()).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        let returned: Vec<_> = outcomes.iter().map(|o| o.execution_id.clone()).collect();
        assert_eq!(returned, ids);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert!(generator.started_at("t3") >= Duration::from_millis(100));
        assert!(generator.started_at("t2") < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_affect_siblings() {
        let generator = Arc::new(ScriptedGenerator::default());
        let executor = ParallelExecutor::new(
            generator,
            ExecutionOptions::new().with_timeout(Duration::from_millis(5000)),
        );
        let (units, contexts, _) = batch(&[
            json!({ "id": "slow", "delay": 6000 }),
            json!({ "id": "quick", "delay": 100 }),
            json!({ "id": "broken", "delay": 10, "fail": true }),
        ]);
        let slow_id = units[0].execution_id().to_string();
        let mut events = executor.events().subscribe(Some(&slow_id));

        let outcomes = executor.run(units, contexts, CancellationToken::new()).await.unwrap();

        assert_eq!(outcomes[0].status, OutcomeStatus::Timeout);
        assert_eq!(outcomes[0].error_kind, Some(ErrorKind::Timeout));
        assert_eq!(outcomes[1].status, OutcomeStatus::Success);
        assert_eq!(outcomes[2].status, OutcomeStatus::Failure);

        let seen = events.drain();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].error_kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_timeout_overrides_batch_timeout() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::new().with_timeout(Duration::from_secs(10)),
        );
        let parent = Arc::new(StateSnapshot::new());
        let unit = ExecutionUnit::new(
            SubagentDefinition::new("worker"),
            json!({ "delay": 500 }).to_string(),
        )
        .with_timeout(Duration::from_millis(200));
        let contexts = ContextIsolationBuilder::default().build_many(&parent, 1);

        let outcomes = executor
            .run(vec![unit], contexts, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes[0].status, OutcomeStatus::Timeout);
        assert!(outcomes[0].duration >= Duration::from_millis(200));
        assert!(outcomes[0].duration < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_cancels_running_sibling() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::new().with_fail_fast(true),
        );
        let (units, contexts, _) = batch(&[
            json!({ "id": "bad", "delay": 10, "fail": true }),
            json!({ "id": "long", "delay": 200 }),
        ]);

        let outcomes = executor.run(units, contexts, CancellationToken::new()).await.unwrap();

        assert_eq!(outcomes[0].status, OutcomeStatus::Failure);
        assert_eq!(outcomes[1].status, OutcomeStatus::Cancelled);
        assert!(outcomes[1].duration < Duration::from_millis(50));
        assert!(executor.progress().cancel_requested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_cancels_queued_units() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::sequential(),
        );
        let (units, contexts, _) = batch(&[
            json!({ "fail": true }),
            json!({ "delay": 10 }),
            json!({ "delay": 10 }),
        ]);
        let mut events = executor.events().subscribe(None);

        let outcomes = executor.run(units, contexts, CancellationToken::new()).await.unwrap();

        assert_eq!(outcomes[0].status, OutcomeStatus::Failure);
        for outcome in &outcomes[1..] {
            assert_eq!(outcome.status, OutcomeStatus::Cancelled);
            assert!(outcome.started_at.is_none());
            assert_eq!(outcome.duration, Duration::ZERO);
        }
        let names: Vec<_> = events.drain().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["start", "error", "start", "error", "start", "error"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation_preserves_finished_outcomes() {
        let executor = Arc::new(ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::default(),
        ));
        let (units, contexts, _) = batch(&[json!({ "delay": 10 }), json!({ "delay": 1000 })]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let outcomes = executor.run(units, contexts, cancel).await.unwrap();

        assert_eq!(outcomes[0].status, OutcomeStatus::Success);
        assert_eq!(outcomes[1].status, OutcomeStatus::Cancelled);
        assert_eq!(outcomes[1].error_kind, Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_panicking_generator_becomes_failure() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::default(),
        );
        let (units, contexts, _) = batch(&[json!({ "panic": true }), json!({})]);
        let outcomes = executor.run(units, contexts, CancellationToken::new()).await.unwrap();

        assert_eq!(outcomes[0].status, OutcomeStatus::Failure);
        assert!(outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("scripted panic"));
        assert!(outcomes[1].is_success());
    }

    #[tokio::test]
    async fn test_guard_rejection_is_guardrail_failure() {
        let guard = |_: &SubagentDefinition, output: &Value| {
            if output["echo"] == json!("blocked") {
                Err("not allowed".to_string())
            } else {
                Ok(())
            }
        };
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::default(),
        )
        .with_guard(Arc::new(guard));
        let (units, contexts, _) = batch(&[json!({ "id": "blocked" }), json!({ "id": "fine" })]);

        let outcomes = executor.run(units, contexts, CancellationToken::new()).await.unwrap();
        assert_eq!(outcomes[0].status, OutcomeStatus::Failure);
        assert_eq!(outcomes[0].error_kind, Some(ErrorKind::Guardrail));
        assert!(outcomes[1].is_success());
    }

    #[tokio::test]
    async fn test_steps_and_merge_are_recorded() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::default(),
        );
        let (units, contexts, parent) = batch(&[json!({ "steps": 3, "write": "/out.md" })]);
        let id = units[0].execution_id().to_string();
        let mut events = executor.events().subscribe(Some(&id));

        let outcomes = executor.run(units, contexts, CancellationToken::new()).await.unwrap();

        assert_eq!(outcomes[0].steps, 3);
        assert!(outcomes[0].merge.as_ref().is_some_and(|m| m.applied));
        assert_eq!(
            parent.files().read("/out.md").unwrap().content,
            vec!["hello"]
        );
        let names: Vec<_> = events.drain().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["start", "step", "step", "step", "finish"]);
    }

    #[tokio::test]
    async fn test_progress_after_run() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::bounded(1),
        );
        let (units, contexts, _) = batch(&[json!({}), json!({ "fail": true })]);
        executor.run(units, contexts, CancellationToken::new()).await.unwrap();

        let progress = executor.progress();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.succeeded, 1);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.running, 0);
        assert_eq!(progress.percentage, 100.0);
        assert!(!progress.cancel_requested);
    }

    #[tokio::test]
    async fn test_rerunning_same_ids_on_shared_stream_is_rejected() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::default(),
        );
        let (units, contexts, parent) = batch(&[json!({})]);
        let again = units.clone();
        executor.run(units, contexts, CancellationToken::new()).await.unwrap();

        let contexts = ContextIsolationBuilder::default().build_many(&parent, 1);
        let result = executor.run(again, contexts, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ConfigurationError::DuplicateExecutionId(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_unit_timeout_is_rejected() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::default(),
        );
        let parent = Arc::new(StateSnapshot::new());
        let unit = ExecutionUnit::new(SubagentDefinition::new("worker"), "{}")
            .with_timeout(Duration::ZERO);
        let contexts = ContextIsolationBuilder::default().build_many(&parent, 1);
        let mut events = executor.events().subscribe(None);

        let result = executor
            .run(vec![unit], contexts, CancellationToken::new())
            .await;
        assert_eq!(result.unwrap_err(), ConfigurationError::ZeroTimeout);
        assert!(events.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_run_aborts_spawned_tasks() {
        let executor = ParallelExecutor::new(
            Arc::new(ScriptedGenerator::default()),
            ExecutionOptions::bounded(1),
        );
        let (units, contexts, parent) = batch(&[
            json!({ "delay": 100, "late_write": "/late.md" }),
            json!({ "write": "/queued.md" }),
        ]);
        let cancel = CancellationToken::new();

        let run = executor.run(units, contexts, cancel.clone());
        assert!(tokio::time::timeout(Duration::from_millis(10), run)
            .await
            .is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!parent.files().contains("/late.md"));
        assert!(!parent.files().contains("/queued.md"));
        assert!(executor.progress().cancel_requested);
        assert!(!cancel.is_cancelled());
    }
}
