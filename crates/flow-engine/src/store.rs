//! Persistence port for workflows, selector history, and step reports.

use async_trait::async_trait;
use dashmap::DashMap;

use webloom_core_types::{RunId, SelectorId, WorkflowId};
use webloom_selector_engine::Selector;

use crate::errors::StoreError;
use crate::model::{StepReport, Workflow};

/// Storage seam. The orchestrator loads definitions through it at run
/// start and writes selector history plus step reports as steps finish.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn load_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError>;

    async fn load_selector(&self, id: &SelectorId) -> Result<Option<Selector>, StoreError>;

    /// Upsert the full selector record, variant history included.
    async fn save_selector_history(&self, selector: &Selector) -> Result<(), StoreError>;

    async fn append_step_report(&self, run_id: &RunId, report: &StepReport)
        -> Result<(), StoreError>;
}

/// Map-backed store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryFlowStore {
    workflows: DashMap<WorkflowId, Workflow>,
    selectors: DashMap<SelectorId, Selector>,
    reports: DashMap<RunId, Vec<StepReport>>,
}

impl InMemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.insert(workflow.id.clone(), workflow);
    }

    pub fn insert_selector(&self, selector: Selector) {
        self.selectors.insert(selector.id.clone(), selector);
    }

    pub fn selector(&self, id: &SelectorId) -> Option<Selector> {
        self.selectors.get(id).map(|entry| entry.clone())
    }

    pub fn reports_for(&self, run_id: &RunId) -> Vec<StepReport> {
        self.reports
            .get(run_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn load_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.get(id).map(|entry| entry.clone()))
    }

    async fn load_selector(&self, id: &SelectorId) -> Result<Option<Selector>, StoreError> {
        Ok(self.selectors.get(id).map(|entry| entry.clone()))
    }

    async fn save_selector_history(&self, selector: &Selector) -> Result<(), StoreError> {
        self.selectors.insert(selector.id.clone(), selector.clone());
        Ok(())
    }

    async fn append_step_report(
        &self,
        run_id: &RunId,
        report: &StepReport,
    ) -> Result<(), StoreError> {
        self.reports
            .entry(run_id.clone())
            .or_default()
            .push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StepStatus, WorkflowStep};
    use webloom_action_engine::{Action, ActionKind};
    use webloom_core_types::StepId;

    #[tokio::test]
    async fn round_trips_workflows_and_selector_history() {
        let store = InMemoryFlowStore::new();
        let workflow = Workflow::new("demo", "qa").with_step(WorkflowStep::new(
            0,
            Action::new("go", ActionKind::Navigate).with_param("url", "https://a.test"),
        ));
        let id = workflow.id.clone();
        store.insert_workflow(workflow);

        let loaded = store.load_workflow(&id).await.unwrap().unwrap();
        assert_eq!(loaded.steps.len(), 1);
        assert!(store
            .load_workflow(&WorkflowId::from("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn appends_reports_per_run() {
        let store = InMemoryFlowStore::new();
        let run_id = RunId::from("run-1");
        for order in 0..3 {
            let report = StepReport {
                step_id: StepId::new(),
                order,
                status: StepStatus::Success,
                output: None,
                error: None,
                attempts: 1,
                duration_micros: 10,
                from_cache: false,
            };
            store.append_step_report(&run_id, &report).await.unwrap();
        }
        let reports = store.reports_for(&run_id);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].order, 2);
        assert!(store.reports_for(&RunId::from("run-2")).is_empty());
    }
}
