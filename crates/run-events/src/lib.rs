//! Run lifecycle events and the sinks that observe them.
//!
//! Every state transition of a run produces exactly one [`RunEvent`]. Sinks
//! are fire-and-forget: `emit` never blocks and never fails, so a slow or
//! broken observer cannot stall an execution.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use webloom_core_types::{RunId, SelectorId, SelectorKind, StepId, WorkflowId};

/// Lifecycle of one workflow run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Aborted
        )
    }

    /// Legal transitions. Terminal states accept nothing.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (RunState::Idle, RunState::Running) => true,
            (RunState::Running, RunState::Completed)
            | (RunState::Running, RunState::Failed)
            | (RunState::Running, RunState::Aborted) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
        }
    }
}

/// Lifecycle of one step inside a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Validating,
    Resolving,
    Executing,
    Done,
    Failed,
    Skipped,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Done | StepState::Failed | StepState::Skipped
        )
    }

    /// Legal transitions. `Skipped` is reachable from any non-terminal
    /// state (condition short-circuit, cancellation, non-critical failure).
    pub fn can_transition_to(&self, next: StepState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, StepState::Skipped) => true,
            (StepState::Pending, StepState::Validating) => true,
            (StepState::Validating, StepState::Resolving) => true,
            (StepState::Validating, StepState::Failed) => true,
            // Selector-free actions jump straight to execution.
            (StepState::Validating, StepState::Executing) => true,
            // A cache hit completes the step without touching the page.
            (StepState::Validating, StepState::Done) => true,
            (StepState::Resolving, StepState::Executing) => true,
            (StepState::Resolving, StepState::Failed) => true,
            // A retry loops the step back through resolution.
            (StepState::Executing, StepState::Resolving) => true,
            (StepState::Executing, StepState::Done) => true,
            (StepState::Executing, StepState::Failed) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Validating => "validating",
            StepState::Resolving => "resolving",
            StepState::Executing => "executing",
            StepState::Done => "done",
            StepState::Failed => "failed",
            StepState::Skipped => "skipped",
        }
    }
}

/// What happened.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    RunTransition {
        from: RunState,
        to: RunState,
    },
    StepTransition {
        step_id: StepId,
        order: u32,
        to: StepState,
        attempts: u32,
        error: Option<String>,
    },
    /// A selector gained a replacement variant through self-healing.
    SelectorHealed {
        selector_id: SelectorId,
        kind: SelectorKind,
        value: String,
    },
}

/// One observable moment in a run's life.
#[derive(Clone, Debug, Serialize)]
pub struct RunEvent {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub kind: RunEventKind,
    pub recorded_at: SystemTime,
}

impl RunEvent {
    pub fn run_transition(
        run_id: RunId,
        workflow_id: WorkflowId,
        from: RunState,
        to: RunState,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            kind: RunEventKind::RunTransition { from, to },
            recorded_at: SystemTime::now(),
        }
    }

    pub fn step_transition(
        run_id: RunId,
        workflow_id: WorkflowId,
        step_id: StepId,
        order: u32,
        to: StepState,
        attempts: u32,
        error: Option<String>,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            kind: RunEventKind::StepTransition {
                step_id,
                order,
                to,
                attempts,
                error,
            },
            recorded_at: SystemTime::now(),
        }
    }

    pub fn selector_healed(
        run_id: RunId,
        workflow_id: WorkflowId,
        selector_id: SelectorId,
        kind: SelectorKind,
        value: String,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            kind: RunEventKind::SelectorHealed {
                selector_id,
                kind,
                value,
            },
            recorded_at: SystemTime::now(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunEventStats {
    pub total_events: u64,
    pub run_transitions: u64,
    pub step_transitions: u64,
    pub selector_heals: u64,
}

#[derive(Debug)]
struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
        }
    }
}

impl<T: Clone> BoundedRing<T> {
    fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

/// Observer of run events. Implementations must return promptly; the
/// orchestrator calls `emit` on its own task between state transitions.
pub trait RunEventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Ring-buffered sink keeping recent events for diagnostics and tests.
pub struct InMemoryEventSink {
    run_capacity: usize,
    events: Mutex<BoundedRing<RunEvent>>,
    run_events: DashMap<RunId, Mutex<BoundedRing<RunEvent>>>,
    stats: Mutex<RunEventStats>,
}

impl InMemoryEventSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            run_capacity: capacity,
            events: Mutex::new(BoundedRing::new(capacity)),
            run_events: DashMap::new(),
            stats: Mutex::new(RunEventStats::default()),
        }
    }

    pub fn snapshot(&self) -> Vec<RunEvent> {
        self.events.lock().snapshot()
    }

    pub fn recent_run(&self, run_id: &RunId) -> Vec<RunEvent> {
        self.run_events
            .get(run_id)
            .map(|entry| entry.value().lock().snapshot())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RunEventStats {
        self.stats.lock().clone()
    }

    fn update_stats(&self, event: &RunEvent) {
        let mut stats = self.stats.lock();
        stats.total_events = stats.total_events.saturating_add(1);
        match &event.kind {
            RunEventKind::RunTransition { .. } => {
                stats.run_transitions = stats.run_transitions.saturating_add(1)
            }
            RunEventKind::StepTransition { .. } => {
                stats.step_transitions = stats.step_transitions.saturating_add(1)
            }
            RunEventKind::SelectorHealed { .. } => {
                stats.selector_heals = stats.selector_heals.saturating_add(1)
            }
        }
    }
}

impl RunEventSink for InMemoryEventSink {
    fn emit(&self, event: RunEvent) {
        {
            let mut guard = self.events.lock();
            guard.push(event.clone());
        }
        {
            let mut entry = self
                .run_events
                .entry(event.run_id.clone())
                .or_insert_with(|| Mutex::new(BoundedRing::new(self.run_capacity)));
            entry.value_mut().lock().push(event.clone());
        }
        self.update_stats(&event);
    }
}

/// Fan-out sink over a tokio broadcast channel. Emission never waits:
/// events sent with no live subscribers are dropped.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<RunEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl RunEventSink for BroadcastEventSink {
    fn emit(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}

/// Discards everything.
pub struct NoopEventSink;

impl NoopEventSink {
    pub fn new() -> Arc<dyn RunEventSink> {
        Arc::new(Self)
    }
}

impl RunEventSink for NoopEventSink {
    fn emit(&self, _event: RunEvent) {}
}
