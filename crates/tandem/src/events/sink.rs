//! Event sinks
//!
//! Observers (logging, metrics, UI bridges) attach to the event stream as ordinary
//! subscribers, each drained on its own tokio task. A sink that is slow, fails, or
//! panics never reaches back into task execution.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::stream::LifecycleEventStream;
use super::types::SubagentEvent;

/// Observer of lifecycle events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Sink name used in log records
    fn name(&self) -> &str;

    /// Handle one event. Errors are logged and otherwise ignored.
    async fn handle(&self, event: &SubagentEvent) -> anyhow::Result<()>;
}

/// Attach `sink` to `stream`.
///
/// With `execution_id == None` the sink sees every execution until the stream is
/// closed. The returned handle resolves with the number of events handled.
pub fn spawn_sink(
    stream: &LifecycleEventStream,
    execution_id: Option<&str>,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<usize> {
    let mut subscription = stream.subscribe(execution_id);
    tokio::spawn(async move {
        let mut handled = 0;
        while let Some(event) = subscription.recv().await {
            let outcome = std::panic::AssertUnwindSafe(sink.handle(&event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    sink = sink.name(),
                    execution_id = event.execution_id(),
                    "event sink failed: {:#}",
                    e
                ),
                Err(_) => warn!(
                    sink = sink.name(),
                    execution_id = event.execution_id(),
                    "event sink panicked"
                ),
            }
            handled += 1;
        }
        debug!(sink = sink.name(), handled, "event sink detached");
        handled
    })
}

/// Writes every lifecycle event as a structured tracing record
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn handle(&self, event: &SubagentEvent) -> anyhow::Result<()> {
        let meta = event.meta();
        match event {
            SubagentEvent::Start { .. } => info!(
                execution_id = %meta.execution_id,
                subagent_type = %meta.subagent_type,
                "subagent started"
            ),
            SubagentEvent::Step { step, .. } => debug!(
                execution_id = %meta.execution_id,
                subagent_type = %meta.subagent_type,
                step,
                "subagent step"
            ),
            SubagentEvent::Finish { .. } => info!(
                execution_id = %meta.execution_id,
                subagent_type = %meta.subagent_type,
                "subagent finished"
            ),
            SubagentEvent::Error { kind, message, .. } => warn!(
                execution_id = %meta.execution_id,
                subagent_type = %meta.subagent_type,
                kind = %kind,
                "subagent errored: {}",
                message
            ),
        }
        Ok(())
    }
}
