//! Run and step state machines.
//!
//! Both machines enforce the legal transition tables from the run-events
//! crate and emit exactly one `RunEvent` per accepted transition. Illegal
//! transitions are rejected without emitting anything.

use std::sync::Arc;

use webloom_core_types::{RunId, StepId, WorkflowId};
use webloom_run_events::{RunEvent, RunEventSink, RunState, StepState};

use crate::errors::FlowError;

pub struct RunMachine {
    run_id: RunId,
    workflow_id: WorkflowId,
    state: RunState,
    sink: Arc<dyn RunEventSink>,
}

impl RunMachine {
    /// A fresh machine always starts in `Idle`.
    pub fn new(run_id: RunId, workflow_id: WorkflowId, sink: Arc<dyn RunEventSink>) -> Self {
        Self {
            run_id,
            workflow_id,
            state: RunState::Idle,
            sink,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transition(&mut self, to: RunState) -> Result<(), FlowError> {
        if !self.state.can_transition_to(to) {
            return Err(FlowError::Internal(format!(
                "illegal run transition {} -> {}",
                self.state.name(),
                to.name()
            )));
        }
        let from = self.state;
        self.state = to;
        self.sink.emit(RunEvent::run_transition(
            self.run_id.clone(),
            self.workflow_id.clone(),
            from,
            to,
        ));
        Ok(())
    }
}

pub struct StepMachine {
    run_id: RunId,
    workflow_id: WorkflowId,
    step_id: StepId,
    order: u32,
    state: StepState,
    attempts: u32,
    sink: Arc<dyn RunEventSink>,
}

impl StepMachine {
    pub fn new(
        run_id: RunId,
        workflow_id: WorkflowId,
        step_id: StepId,
        order: u32,
        sink: Arc<dyn RunEventSink>,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            step_id,
            order,
            state: StepState::Pending,
            attempts: 0,
            sink,
        }
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn transition(&mut self, to: StepState, error: Option<String>) -> Result<(), FlowError> {
        if !self.state.can_transition_to(to) {
            return Err(FlowError::Internal(format!(
                "illegal step transition {} -> {} (step {})",
                self.state.name(),
                to.name(),
                self.step_id
            )));
        }
        self.state = to;
        self.sink.emit(RunEvent::step_transition(
            self.run_id.clone(),
            self.workflow_id.clone(),
            self.step_id.clone(),
            self.order,
            to,
            self.attempts,
            error,
        ));
        Ok(())
    }

    /// Enter `Resolving` for this attempt. Re-entry from `Executing` is the
    /// retry loop; staying in `Resolving` after a failed resolve is not a
    /// transition and emits nothing.
    pub fn begin_resolve(&mut self) -> Result<(), FlowError> {
        match self.state {
            StepState::Resolving => Ok(()),
            StepState::Validating | StepState::Executing => {
                self.transition(StepState::Resolving, None)
            }
            other => Err(FlowError::Internal(format!(
                "cannot start resolving from {}",
                other.name()
            ))),
        }
    }

    /// Enter `Executing`. Selector-free actions come straight from
    /// `Validating`.
    pub fn begin_execute(&mut self) -> Result<(), FlowError> {
        match self.state {
            StepState::Executing => Ok(()),
            StepState::Validating | StepState::Resolving => {
                self.transition(StepState::Executing, None)
            }
            other => Err(FlowError::Internal(format!(
                "cannot start executing from {}",
                other.name()
            ))),
        }
    }
}
