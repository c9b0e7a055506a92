//! Lifecycle Event Stream
//!
//! Ordered per-execution event channel with non-blocking fan-out.
//!
//! # Features
//! - Per-execution state machine; out-of-order events are rejected, never delivered
//! - Per-execution or merged subscriptions, each with its own unbounded buffer
//! - Bounded history for replaying events to late subscribers
//!
//! A finished execution's phase is forgotten once its terminal event is evicted
//! from history, so a long-lived stream stays bounded. After that the id reads as
//! [`ExecutionPhase::NotStarted`] again. With a history limit of zero nothing is
//! evicted and every phase is kept.
//!
//! `emit` never waits on a subscriber: delivery is an unbounded channel send, so a
//! slow or absent consumer only grows its own buffer.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::{ExecutionPhase, SubagentEvent};

/// Result type alias for event stream operations
pub type EventStreamResult<T> = Result<T, EventStreamError>;

/// Error types for event stream operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStreamError {
    /// The event is not allowed in the execution's current phase
    #[error("execution {execution_id}: `{event}` event not allowed in phase {phase}")]
    InvalidTransition {
        execution_id: String,
        phase: ExecutionPhase,
        event: &'static str,
    },

    /// The stream was closed
    #[error("event stream is closed")]
    Closed,
}

const DEFAULT_HISTORY_LIMIT: usize = 1024;

struct Subscriber {
    execution_id: Option<String>,
    sender: mpsc::UnboundedSender<SubagentEvent>,
}

impl Subscriber {
    fn matches(&self, event: &SubagentEvent) -> bool {
        self.execution_id
            .as_deref()
            .map_or(true, |id| id == event.execution_id())
    }
}

struct StreamInner {
    phases: HashMap<String, ExecutionPhase>,
    subscribers: Vec<Subscriber>,
    history: VecDeque<SubagentEvent>,
    history_limit: usize,
    closed: bool,
}

impl StreamInner {
    fn phase(&self, execution_id: &str) -> ExecutionPhase {
        self.phases.get(execution_id).copied().unwrap_or_default()
    }

    fn record(&mut self, event: SubagentEvent) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            let Some(evicted) = self.history.pop_front() else {
                break;
            };
            let id = evicted.execution_id();
            if evicted.is_terminal() && self.phase(id).is_terminal() {
                self.phases.remove(id);
            }
        }
        self.history.push_back(event);
    }
}

/// Event stream shared by every execution in a batch
pub struct LifecycleEventStream {
    inner: Mutex<StreamInner>,
}

impl std::fmt::Debug for LifecycleEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LifecycleEventStream")
            .field("executions", &inner.phases.len())
            .field("subscribers", &inner.subscribers.len())
            .field("history", &inner.history.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl Default for LifecycleEventStream {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleEventStream {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `limit` events for replay (oldest evicted first)
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            inner: Mutex::new(StreamInner {
                phases: HashMap::new(),
                subscribers: Vec::new(),
                history: VecDeque::new(),
                history_limit: limit,
                closed: false,
            }),
        }
    }

    /// Append `event` to its execution's sequence and fan it out.
    ///
    /// Per-execution subscriptions end right after their terminal event.
    pub fn emit(&self, event: SubagentEvent) -> EventStreamResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(EventStreamError::Closed);
        }

        let execution_id = event.execution_id().to_string();
        let current = inner.phase(&execution_id);
        let next = current
            .advance(&event)
            .ok_or_else(|| EventStreamError::InvalidTransition {
                execution_id: execution_id.clone(),
                phase: current,
                event: event.name(),
            })?;
        inner.phases.insert(execution_id, next);

        let terminal = event.is_terminal();
        inner.subscribers.retain(|sub| {
            if !sub.matches(&event) {
                return !sub.sender.is_closed();
            }
            if sub.sender.send(event.clone()).is_err() {
                return false;
            }
            !(terminal && sub.execution_id.is_some())
        });
        inner.record(event);
        Ok(())
    }

    /// Subscribe to one execution (`Some(id)`) or to every execution (`None`),
    /// starting from the next emitted event.
    pub fn subscribe(&self, execution_id: Option<&str>) -> EventSubscription {
        self.register(execution_id, false)
    }

    /// Like [`subscribe`](Self::subscribe), but first replays buffered history
    pub fn subscribe_with_replay(&self, execution_id: Option<&str>) -> EventSubscription {
        self.register(execution_id, true)
    }

    fn register(&self, execution_id: Option<&str>, replay: bool) -> EventSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscriber = Subscriber {
            execution_id: execution_id.map(str::to_string),
            sender,
        };

        let mut inner = self.inner.lock();
        if replay {
            for event in inner.history.iter().filter(|e| subscriber.matches(e)) {
                let _ = subscriber.sender.send(event.clone());
            }
        }

        let finished = execution_id.is_some_and(|id| inner.phase(id).is_terminal());
        if !inner.closed && !finished {
            inner.subscribers.push(subscriber);
        }

        EventSubscription {
            execution_id: execution_id.map(str::to_string),
            receiver,
        }
    }

    /// Current phase of an execution
    pub fn phase(&self, execution_id: &str) -> ExecutionPhase {
        self.inner.lock().phase(execution_id)
    }

    /// Executions that have started but not reached a terminal event
    pub fn active_executions(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut active: Vec<String> = inner
            .phases
            .iter()
            .filter(|(_, phase)| !phase.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }

    /// Buffered events, optionally for a single execution
    pub fn history(&self, execution_id: Option<&str>) -> Vec<SubagentEvent> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|e| execution_id.map_or(true, |id| e.execution_id() == id))
            .cloned()
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.sender.is_closed());
        inner.subscribers.len()
    }

    /// Stop accepting events and end every open subscription.
    /// Buffered events stay readable by their subscribers.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Receiving end of a subscription.
///
/// Yields events in emission order and ends when the stream closes (merged
/// subscriptions) or after the execution's terminal event (per-execution ones).
#[derive(Debug)]
pub struct EventSubscription {
    execution_id: Option<String>,
    receiver: mpsc::UnboundedReceiver<SubagentEvent>,
}

impl EventSubscription {
    /// Execution this subscription is scoped to, if any
    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    /// Wait for the next event; `None` once the subscription has ended
    pub async fn recv(&mut self) -> Option<SubagentEvent> {
        self.receiver.recv().await
    }

    /// Next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<SubagentEvent> {
        self.receiver.try_recv().ok()
    }

    /// Every event buffered so far
    pub fn drain(&mut self) -> Vec<SubagentEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for EventSubscription {
    type Item = SubagentEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
