//! Workflow definitions and run reports.
//!
//! A workflow is a list of steps with a dense total order. Steps sharing a
//! `parallel_group` name must sit adjacent in that order; the group then
//! occupies a single position and its members run concurrently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use webloom_action_engine::Action;
use webloom_core_types::{RunId, SelectorId, StepId, WorkflowId};
use webloom_run_events::RunState;

use crate::errors::FlowError;

/// Document-state predicate gating a step. Evaluated with a side-effect
/// free resolver probe before the step's validator or handler run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    ElementPresent(SelectorId),
    ElementAbsent(SelectorId),
    PrevStepSucceeded,
    All(Vec<StepCondition>),
    Any(Vec<StepCondition>),
    Not(Box<StepCondition>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    /// Position in the workflow's total order. Dense and unique from 0.
    pub order: u32,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    /// Non-critical steps record their failure and let the run continue.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl WorkflowStep {
    pub fn new(order: u32, action: Action) -> Self {
        Self {
            id: StepId::new(),
            order,
            action,
            condition: None,
            parallel_group: None,
            continue_on_error: false,
        }
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub owner: String,
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            owner: owner.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Steps sorted by their order field.
    pub fn ordered_steps(&self) -> Vec<&WorkflowStep> {
        let mut steps: Vec<&WorkflowStep> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.order);
        steps
    }

    /// Structural checks: orders dense and unique from 0, parallel group
    /// members adjacent.
    pub fn validate(&self) -> Result<(), FlowError> {
        let mut orders: Vec<u32> = self.steps.iter().map(|step| step.order).collect();
        orders.sort_unstable();
        for (position, order) in orders.iter().enumerate() {
            if *order != position as u32 {
                return Err(FlowError::InvalidStructure(format!(
                    "step orders must be dense and unique from 0, found {order} at position {position}"
                )));
            }
        }

        let ordered = self.ordered_steps();
        let mut closed_groups: Vec<&str> = Vec::new();
        let mut current_group: Option<&str> = None;
        for step in &ordered {
            match step.parallel_group.as_deref() {
                Some(group) => {
                    if current_group == Some(group) {
                        continue;
                    }
                    if closed_groups.contains(&group) {
                        return Err(FlowError::InvalidStructure(format!(
                            "parallel group '{group}' members must be adjacent in order"
                        )));
                    }
                    if let Some(previous) = current_group.take() {
                        closed_groups.push(previous);
                    }
                    current_group = Some(group);
                }
                None => {
                    if let Some(previous) = current_group.take() {
                        closed_groups.push(previous);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Terminal outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// What one step did: a condition skip is `Skipped` with no error; a
/// tolerated failure is `Skipped` with the error recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step_id: StepId,
    pub order: u32,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub duration_micros: u64,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub state: RunState,
    pub steps: Vec<StepReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn step(&self, order: u32) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.order == order)
    }

    pub fn first_failure(&self) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.status == StepStatus::Failed)
    }
}
