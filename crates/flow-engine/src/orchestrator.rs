//! The run orchestrator.
//!
//! Drives a workflow through the run state machine: steps execute in their
//! total order, parallel groups share one slot and run concurrently under a
//! worker limit, conditions are probed without side effects, cacheable
//! results short-circuit execution, and every step outcome is persisted
//! through the store as it lands.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use webloom_action_engine::{
    action_fingerprint, validate, ExecError, HandlerRegistry, ResultCache, RetryController,
};
use webloom_core_types::{PageRoute, RunId, SelectorId, WorkflowId};
use webloom_run_events::{RunEvent, RunEventSink, RunState, StepState};
use webloom_selector_engine::{ResolveMode, SelectorResolver, SelectorVault};

use crate::errors::FlowError;
use crate::model::{RunReport, StepCondition, StepReport, StepStatus, Workflow, WorkflowStep};
use crate::state::{RunMachine, StepMachine};
use crate::store::FlowStore;

/// One position in the execution order: a lone step, or a batch of
/// adjacent steps sharing a parallel group.
enum Slot {
    Single(usize),
    Group(Vec<usize>),
}

fn partition_slots(steps: &[WorkflowStep]) -> Vec<Slot> {
    let mut slots = Vec::new();
    let mut index = 0;
    while index < steps.len() {
        match &steps[index].parallel_group {
            Some(group) => {
                let mut members = vec![index];
                let mut next = index + 1;
                while next < steps.len()
                    && steps[next].parallel_group.as_deref() == Some(group.as_str())
                {
                    members.push(next);
                    next += 1;
                }
                index = next;
                if members.len() == 1 {
                    slots.push(Slot::Single(members[0]));
                } else {
                    slots.push(Slot::Group(members));
                }
            }
            None => {
                slots.push(Slot::Single(index));
                index += 1;
            }
        }
    }
    slots
}

/// Step machine transitions driven here are legal by construction; a
/// rejection means a bookkeeping bug, which is worth a log line but must
/// not take the run down.
fn note_transition(result: Result<(), FlowError>) {
    if let Err(err) = result {
        error!(error = %err, "step state bookkeeping failed");
    }
}

pub(crate) enum StepControl {
    Continue,
    FailRun(FlowError),
    Abort,
}

pub(crate) struct StepOutcome {
    pub report: StepReport,
    pub control: StepControl,
}

impl StepOutcome {
    fn internal(step: &WorkflowStep, reason: &str) -> Self {
        Self {
            report: StepReport {
                step_id: step.id.clone(),
                order: step.order,
                status: StepStatus::Failed,
                output: None,
                error: Some(reason.to_string()),
                attempts: 0,
                duration_micros: 0,
                from_cache: false,
            },
            control: StepControl::FailRun(FlowError::Internal(reason.to_string())),
        }
    }
}

fn step_report(
    step: &WorkflowStep,
    status: StepStatus,
    output: Option<Value>,
    error: Option<String>,
    attempts: u32,
    started: Instant,
    from_cache: bool,
) -> StepReport {
    StepReport {
        step_id: step.id.clone(),
        order: step.order,
        status,
        output,
        error,
        attempts,
        duration_micros: started.elapsed().as_micros() as u64,
        from_cache,
    }
}

/// Everything a step needs, cloneable into spawned group members.
#[derive(Clone)]
struct StepContext {
    run_id: RunId,
    workflow_id: WorkflowId,
    resolver: Arc<dyn SelectorResolver>,
    registry: Arc<HandlerRegistry>,
    retry: Arc<RetryController>,
    cache: Arc<ResultCache>,
    sink: Arc<dyn RunEventSink>,
}

impl StepContext {
    async fn run_step(
        &self,
        route: &PageRoute,
        step: &WorkflowStep,
        prev_succeeded: bool,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let started = Instant::now();
        let mut machine = StepMachine::new(
            self.run_id.clone(),
            self.workflow_id.clone(),
            step.id.clone(),
            step.order,
            self.sink.clone(),
        );

        if cancel.is_cancelled() {
            let message = "run cancelled".to_string();
            note_transition(machine.transition(StepState::Skipped, Some(message.clone())));
            return StepOutcome {
                report: step_report(
                    step,
                    StepStatus::Skipped,
                    None,
                    Some(message),
                    0,
                    started,
                    false,
                ),
                control: StepControl::Abort,
            };
        }

        // Condition gate: a false condition skips the step before the
        // validator or any handler is touched.
        if let Some(condition) = &step.condition {
            if !self.evaluate_condition(route, condition, prev_succeeded).await {
                debug!(step = %step.id, order = step.order, "condition not met, skipping");
                note_transition(machine.transition(StepState::Skipped, None));
                return StepOutcome {
                    report: step_report(step, StepStatus::Skipped, None, None, 0, started, false),
                    control: StepControl::Continue,
                };
            }
        }

        note_transition(machine.transition(StepState::Validating, None));
        if let Err(violation) = validate(&step.action) {
            return self.fail_step(step, &mut machine, started, ExecError::Validation(violation));
        }

        let fingerprint = step
            .action
            .kind
            .is_cacheable()
            .then(|| action_fingerprint(&step.action));
        if let Some(key) = &fingerprint {
            if let Some(value) = self.cache.get(key) {
                debug!(step = %step.id, order = step.order, "result served from cache");
                note_transition(machine.transition(StepState::Done, None));
                return StepOutcome {
                    report: step_report(
                        step,
                        StepStatus::Success,
                        Some(value),
                        None,
                        0,
                        started,
                        true,
                    ),
                    control: StepControl::Continue,
                };
            }
        }

        let mode = if step.action.kind.wants_many() {
            ResolveMode::Many
        } else {
            ResolveMode::Unique
        };
        let machine = Mutex::new(machine);
        let outcome = self
            .retry
            .run(cancel, |_attempt| {
                let machine = &machine;
                let action = &step.action;
                async move {
                    machine.lock().record_attempt();
                    let resolution = match &action.selector {
                        Some(selector_id) => {
                            note_transition(machine.lock().begin_resolve());
                            let resolution =
                                self.resolver.resolve(route, selector_id, mode).await?;
                            if resolution.healed {
                                info!(
                                    selector = %resolution.selector_id,
                                    kind = resolution.kind.name(),
                                    value = %resolution.value,
                                    "selector healed during resolution"
                                );
                                self.sink.emit(RunEvent::selector_healed(
                                    self.run_id.clone(),
                                    self.workflow_id.clone(),
                                    resolution.selector_id.clone(),
                                    resolution.kind,
                                    resolution.value.clone(),
                                ));
                            }
                            Some(resolution)
                        }
                        None => None,
                    };
                    note_transition(machine.lock().begin_execute());
                    let handler = self.registry.dispatch(action.kind)?;
                    let handles = resolution
                        .as_ref()
                        .map(|r| r.handles.as_slice())
                        .unwrap_or_default();
                    let output = handler.execute(route, handles, action).await?;
                    Ok(output)
                }
            })
            .await;

        let mut machine = machine.into_inner();
        match outcome {
            Ok(output) => {
                note_transition(machine.transition(StepState::Done, None));
                if let Some(key) = fingerprint {
                    self.cache.put(key, output.clone());
                }
                StepOutcome {
                    report: step_report(
                        step,
                        StepStatus::Success,
                        Some(output),
                        None,
                        machine.attempts(),
                        started,
                        false,
                    ),
                    control: StepControl::Continue,
                }
            }
            Err(err) => self.fail_step(step, &mut machine, started, err),
        }
    }

    fn fail_step(
        &self,
        step: &WorkflowStep,
        machine: &mut StepMachine,
        started: Instant,
        err: ExecError,
    ) -> StepOutcome {
        let message = err.to_string();
        let attempts = machine.attempts();

        if matches!(err, ExecError::Cancelled) {
            note_transition(machine.transition(StepState::Skipped, Some(message.clone())));
            return StepOutcome {
                report: step_report(
                    step,
                    StepStatus::Skipped,
                    None,
                    Some(message),
                    attempts,
                    started,
                    false,
                ),
                control: StepControl::Abort,
            };
        }

        if step.continue_on_error {
            warn!(
                step = %step.id,
                order = step.order,
                error = %message,
                "non-critical step failed, continuing"
            );
            note_transition(machine.transition(StepState::Skipped, Some(message.clone())));
            return StepOutcome {
                report: step_report(
                    step,
                    StepStatus::Skipped,
                    None,
                    Some(message),
                    attempts,
                    started,
                    false,
                ),
                control: StepControl::Continue,
            };
        }

        warn!(step = %step.id, order = step.order, error = %message, "step failed");
        note_transition(machine.transition(StepState::Failed, Some(message.clone())));
        StepOutcome {
            report: step_report(
                step,
                StepStatus::Failed,
                None,
                Some(message.clone()),
                attempts,
                started,
                false,
            ),
            control: StepControl::FailRun(FlowError::StepAborted {
                order: step.order,
                reason: message,
            }),
        }
    }

    fn evaluate_condition<'a>(
        &'a self,
        route: &'a PageRoute,
        condition: &'a StepCondition,
        prev_succeeded: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            match condition {
                StepCondition::ElementPresent(selector_id) => {
                    self.probe(route, selector_id).await > 0
                }
                StepCondition::ElementAbsent(selector_id) => {
                    self.probe(route, selector_id).await == 0
                }
                StepCondition::PrevStepSucceeded => prev_succeeded,
                StepCondition::All(conditions) => {
                    for inner in conditions {
                        if !self.evaluate_condition(route, inner, prev_succeeded).await {
                            return false;
                        }
                    }
                    true
                }
                StepCondition::Any(conditions) => {
                    for inner in conditions {
                        if self.evaluate_condition(route, inner, prev_succeeded).await {
                            return true;
                        }
                    }
                    false
                }
                StepCondition::Not(inner) => {
                    !self.evaluate_condition(route, inner, prev_succeeded).await
                }
            }
        })
    }

    /// Probe failures count as zero matches rather than failing the step.
    async fn probe(&self, route: &PageRoute, selector_id: &SelectorId) -> usize {
        match self.resolver.peek_count(route, selector_id).await {
            Ok(count) => count,
            Err(err) => {
                warn!(selector = %selector_id, error = %err, "condition probe failed");
                0
            }
        }
    }
}

pub struct Orchestrator {
    resolver: Arc<dyn SelectorResolver>,
    registry: Arc<HandlerRegistry>,
    retry: Arc<RetryController>,
    cache: Arc<ResultCache>,
    vault: Arc<SelectorVault>,
    store: Arc<dyn FlowStore>,
    sink: Arc<dyn RunEventSink>,
    worker_limit: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<dyn SelectorResolver>,
        registry: Arc<HandlerRegistry>,
        retry: Arc<RetryController>,
        cache: Arc<ResultCache>,
        vault: Arc<SelectorVault>,
        store: Arc<dyn FlowStore>,
        sink: Arc<dyn RunEventSink>,
        worker_limit: usize,
    ) -> Self {
        Self {
            resolver,
            registry,
            retry,
            cache,
            vault,
            store,
            sink,
            worker_limit: worker_limit.max(1),
        }
    }

    /// Execute one run of the workflow against the given page route.
    ///
    /// The returned report covers completed, failed, and aborted runs
    /// alike; `Err` is reserved for problems before the run starts and for
    /// store failures while recording it.
    pub async fn run(
        &self,
        workflow_id: &WorkflowId,
        route: &PageRoute,
        cancel: CancellationToken,
    ) -> Result<RunReport, FlowError> {
        if cancel.is_cancelled() {
            return Err(FlowError::RunCancelled);
        }
        let workflow = self
            .store
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| FlowError::WorkflowNotFound(workflow_id.clone()))?;
        workflow.validate()?;
        self.seed_vault(&workflow).await?;

        let run_id = RunId::new();
        let started_at = Utc::now();
        let mut machine = RunMachine::new(run_id.clone(), workflow.id.clone(), self.sink.clone());
        machine.transition(RunState::Running)?;
        info!(
            run = %run_id,
            workflow = %workflow.id,
            steps = workflow.steps.len(),
            "run started"
        );

        let context = StepContext {
            run_id: run_id.clone(),
            workflow_id: workflow.id.clone(),
            resolver: self.resolver.clone(),
            registry: self.registry.clone(),
            retry: self.retry.clone(),
            cache: self.cache.clone(),
            sink: self.sink.clone(),
        };

        let mut ordered = workflow.steps.clone();
        ordered.sort_by_key(|step| step.order);
        let slots = partition_slots(&ordered);

        let mut reports: Vec<StepReport> = Vec::with_capacity(ordered.len());
        let mut prev_status: Option<StepStatus> = None;
        let mut failure: Option<FlowError> = None;
        let mut aborted = false;

        for slot in slots {
            if cancel.is_cancelled() {
                aborted = true;
                break;
            }
            let prev_succeeded = matches!(prev_status, None | Some(StepStatus::Success));
            match slot {
                Slot::Single(index) => {
                    let step = &ordered[index];
                    let outcome = context.run_step(route, step, prev_succeeded, &cancel).await;
                    self.persist(&run_id, step, &outcome.report).await?;
                    prev_status = Some(outcome.report.status);
                    match outcome.control {
                        StepControl::Continue => {}
                        StepControl::FailRun(reason) => failure = Some(reason),
                        StepControl::Abort => aborted = true,
                    }
                    reports.push(outcome.report);
                }
                Slot::Group(members) => {
                    let outcomes = self
                        .run_group(&context, route, &ordered, &members, prev_succeeded, &cancel)
                        .await;
                    let mut group_status = StepStatus::Skipped;
                    for outcome in outcomes {
                        if let Some(step) =
                            ordered.iter().find(|step| step.order == outcome.report.order)
                        {
                            self.persist(&run_id, step, &outcome.report).await?;
                        }
                        match outcome.report.status {
                            StepStatus::Failed => group_status = StepStatus::Failed,
                            StepStatus::Success => {
                                if group_status != StepStatus::Failed {
                                    group_status = StepStatus::Success;
                                }
                            }
                            StepStatus::Skipped => {}
                        }
                        match outcome.control {
                            StepControl::Continue => {}
                            StepControl::FailRun(reason) => {
                                if failure.is_none() {
                                    failure = Some(reason);
                                }
                            }
                            StepControl::Abort => aborted = true,
                        }
                        reports.push(outcome.report);
                    }
                    prev_status = Some(group_status);
                }
            }
            if failure.is_some() || aborted {
                break;
            }
        }

        let final_state = if let Some(reason) = &failure {
            warn!(run = %run_id, error = %reason, "run failed");
            RunState::Failed
        } else if aborted {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        machine.transition(final_state)?;
        info!(
            run = %run_id,
            state = final_state.name(),
            steps = reports.len(),
            "run finished"
        );

        Ok(RunReport {
            run_id,
            workflow_id: workflow.id.clone(),
            state: final_state,
            steps: reports,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Pull every selector the workflow references out of the store. Unknown
    /// selectors stay absent and surface at resolution time.
    async fn seed_vault(&self, workflow: &Workflow) -> Result<(), FlowError> {
        for step in &workflow.steps {
            let Some(selector_id) = &step.action.selector else {
                continue;
            };
            if self.vault.contains(selector_id) {
                continue;
            }
            match self.store.load_selector(selector_id).await? {
                Some(selector) => self.vault.insert(selector),
                None => {
                    debug!(selector = %selector_id, "selector not in store");
                }
            }
        }
        Ok(())
    }

    async fn run_group(
        &self,
        context: &StepContext,
        route: &PageRoute,
        steps: &[WorkflowStep],
        members: &[usize],
        prev_succeeded: bool,
        cancel: &CancellationToken,
    ) -> Vec<StepOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.worker_limit));
        let mut join_set = JoinSet::new();
        for &index in members {
            let context = context.clone();
            let route = route.clone();
            let step = steps[index].clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return StepOutcome::internal(&step, "worker pool closed"),
                };
                context.run_step(&route, &step, prev_succeeded, &cancel).await
            });
        }

        let mut outcomes = Vec::with_capacity(members.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "parallel step task did not complete"),
            }
        }
        outcomes.sort_by_key(|outcome| outcome.report.order);
        outcomes
    }

    async fn persist(
        &self,
        run_id: &RunId,
        step: &WorkflowStep,
        report: &StepReport,
    ) -> Result<(), FlowError> {
        if let Some(selector_id) = &step.action.selector {
            if let Some(selector) = self.vault.snapshot(selector_id).await {
                self.store.save_selector_history(&selector).await?;
            }
        }
        self.store.append_step_report(run_id, report).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryFlowStore;
    use std::time::Duration;
    use webloom_action_engine::{Action, ActionKind, RetryPolicy};
    use webloom_core_types::{PageId, SelectorKind, SessionId};
    use webloom_page_bridge::{ScriptedElement, ScriptedPageBridge};
    use webloom_run_events::InMemoryEventSink;
    use webloom_selector_engine::{
        DefaultSelectorResolver, HealerTuning, ResolverTuning, Selector, SelectorVariant,
    };

    fn route() -> PageRoute {
        PageRoute::new(SessionId::from("sess-1"), PageId::from("pg-1"))
    }

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<InMemoryFlowStore>,
        sink: Arc<InMemoryEventSink>,
    }

    fn harness(bridge: Arc<ScriptedPageBridge>, workers: usize, max_attempts: u32) -> Harness {
        let vault = Arc::new(SelectorVault::new());
        let tuning = ResolverTuning {
            resolve_timeout: Duration::from_millis(60),
            poll_interval: Duration::from_millis(10),
            ..ResolverTuning::default()
        };
        let resolver = Arc::new(DefaultSelectorResolver::standard(
            bridge.clone(),
            vault.clone(),
            tuning,
            HealerTuning::default(),
        ));
        let registry = Arc::new(HandlerRegistry::standard(bridge));
        let retry = Arc::new(RetryController::new(RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }));
        let cache = Arc::new(ResultCache::new(64, Duration::from_secs(300)));
        let store = Arc::new(InMemoryFlowStore::new());
        let sink = Arc::new(InMemoryEventSink::new(256));
        let orchestrator = Orchestrator::new(
            resolver,
            registry,
            retry,
            cache,
            vault,
            store.clone(),
            sink.clone(),
            workers,
        );
        Harness {
            orchestrator,
            store,
            sink,
        }
    }

    fn seed_selector(store: &InMemoryFlowStore, id: &str, kind: SelectorKind, value: &str) {
        let selector = Selector::new(SelectorId::from(id), "demo.test", id)
            .with_variant(SelectorVariant::new(kind, value).active());
        store.insert_selector(selector);
    }

    fn click(order: u32, selector: &str) -> WorkflowStep {
        WorkflowStep::new(
            order,
            Action::new(format!("click {selector}"), ActionKind::Click)
                .with_selector(SelectorId::from(selector)),
        )
    }

    #[tokio::test]
    async fn sequential_steps_run_in_order_and_complete() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("button").with_attr("id", "go"),
            ScriptedElement::new("input").with_attr("name", "email"),
        ]));
        let h = harness(bridge.clone(), 5, 3);
        seed_selector(&h.store, "sel-go", SelectorKind::Identifier, "go");
        seed_selector(&h.store, "sel-email", SelectorKind::Identifier, "email");

        let workflow = Workflow::new("signup", "qa")
            .with_step(click(0, "sel-go"))
            .with_step(WorkflowStep::new(
                1,
                Action::new("fill email", ActionKind::Fill)
                    .with_selector(SelectorId::from("sel-email"))
                    .with_param("text", "hello"),
            ));
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        let report = h
            .orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert!(report.succeeded());
        assert_eq!(report.steps.len(), 2);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Success));
        assert_eq!(report.steps[0].attempts, 1);

        let ops: Vec<String> = bridge.op_log().iter().map(|(_, op)| op.name().to_string()).collect();
        assert_eq!(ops, vec!["click", "fill"]);
        assert_eq!(h.store.reports_for(&report.run_id).len(), 2);
        assert_eq!(h.sink.stats().run_transitions, 2);
    }

    #[tokio::test]
    async fn false_condition_skips_without_touching_the_page() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("button").with_attr("id", "go"),
        ]));
        let h = harness(bridge.clone(), 5, 3);
        seed_selector(&h.store, "sel-go", SelectorKind::Identifier, "go");

        let workflow = Workflow::new("gated", "qa")
            .with_step(
                click(0, "sel-go")
                    .when(StepCondition::ElementPresent(SelectorId::from("sel-missing"))),
            )
            .with_step(click(1, "sel-go"));
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        let report = h
            .orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        let skipped = report.step(0).unwrap();
        assert_eq!(skipped.status, StepStatus::Skipped);
        assert!(skipped.error.is_none());
        assert_eq!(skipped.attempts, 0);
        assert_eq!(report.step(1).unwrap().status, StepStatus::Success);
        // Only the unconditioned click reached the page.
        assert_eq!(bridge.op_log().len(), 1);
    }

    #[tokio::test]
    async fn critical_failure_fails_the_run_and_stops_later_steps() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("button").with_attr("id", "go"),
        ]));
        let h = harness(bridge.clone(), 5, 2);
        seed_selector(&h.store, "sel-ghost", SelectorKind::Identifier, "nope");
        seed_selector(&h.store, "sel-go", SelectorKind::Identifier, "go");

        let workflow = Workflow::new("fragile", "qa")
            .with_step(click(0, "sel-ghost"))
            .with_step(click(1, "sel-go"));
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        let report = h
            .orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.steps.len(), 1);
        let failed = report.first_failure().unwrap();
        assert_eq!(failed.order, 0);
        assert_eq!(failed.attempts, 2);
        assert!(failed.error.as_deref().unwrap_or_default().contains("exhausted"));
        assert!(bridge.op_log().is_empty());
    }

    #[tokio::test]
    async fn non_critical_failure_is_recorded_and_run_continues() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("button").with_attr("id", "go"),
        ]));
        let h = harness(bridge, 5, 1);
        seed_selector(&h.store, "sel-ghost", SelectorKind::Identifier, "nope");
        seed_selector(&h.store, "sel-go", SelectorKind::Identifier, "go");

        let workflow = Workflow::new("tolerant", "qa")
            .with_step(click(0, "sel-ghost").non_critical())
            .with_step(click(1, "sel-go"));
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        let report = h
            .orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        let tolerated = report.step(0).unwrap();
        assert_eq!(tolerated.status, StepStatus::Skipped);
        assert!(tolerated.error.is_some());
        assert_eq!(report.step(1).unwrap().status, StepStatus::Success);
    }

    #[tokio::test]
    async fn prev_step_succeeded_condition_gates_downstream_steps() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("button").with_attr("id", "go").with_text("Go"),
        ]));
        let h = harness(bridge, 5, 1);
        seed_selector(&h.store, "sel-ghost", SelectorKind::Identifier, "nope");
        seed_selector(&h.store, "sel-go", SelectorKind::Identifier, "go");

        let workflow = Workflow::new("chained", "qa")
            .with_step(click(0, "sel-ghost").non_critical())
            .with_step(click(1, "sel-go").when(StepCondition::PrevStepSucceeded))
            .with_step(
                WorkflowStep::new(
                    2,
                    Action::new("read go", ActionKind::ExtractText)
                        .with_selector(SelectorId::from("sel-go")),
                )
                .when(StepCondition::Not(Box::new(StepCondition::PrevStepSucceeded))),
            );
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        let report = h
            .orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.step(0).unwrap().status, StepStatus::Skipped);
        assert_eq!(report.step(1).unwrap().status, StepStatus::Skipped);
        let read = report.step(2).unwrap();
        assert_eq!(read.status, StepStatus::Success);
        assert_eq!(read.output, Some(serde_json::json!("Go")));
    }

    async fn run_parallel_rows(workers: usize) -> (Arc<ScriptedPageBridge>, RunReport) {
        let bridge = Arc::new(
            ScriptedPageBridge::new()
                .with_elements(vec![
                    ScriptedElement::new("li").with_attr("id", "row-a").with_text("alpha"),
                    ScriptedElement::new("li").with_attr("id", "row-b").with_text("beta"),
                    ScriptedElement::new("li").with_attr("id", "row-c").with_text("gamma"),
                ])
                .with_act_delay(Duration::from_millis(30)),
        );
        let h = harness(bridge.clone(), workers, 3);
        for name in ["row-a", "row-b", "row-c"] {
            seed_selector(&h.store, &format!("sel-{name}"), SelectorKind::Identifier, name);
        }

        let mut workflow = Workflow::new("rows", "qa");
        for (order, name) in ["row-a", "row-b", "row-c"].iter().enumerate() {
            workflow = workflow.with_step(
                WorkflowStep::new(
                    order as u32,
                    Action::new(format!("read {name}"), ActionKind::ExtractText)
                        .with_selector(SelectorId::from(format!("sel-{name}").as_str())),
                )
                .in_group("rows"),
            );
        }
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        let report = h
            .orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();
        (bridge, report)
    }

    #[tokio::test]
    async fn parallel_group_overlaps_under_a_wide_worker_limit() {
        let (bridge, report) = run_parallel_rows(5).await;
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.steps.len(), 3);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Success));
        assert!(
            bridge.act_high_water() > 1,
            "expected overlapping page ops, high water was {}",
            bridge.act_high_water()
        );
    }

    #[tokio::test]
    async fn parallel_group_serializes_under_a_limit_of_one() {
        let (bridge, report) = run_parallel_rows(1).await;
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(bridge.act_high_water(), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_the_next_slot() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("button").with_attr("id", "go"),
        ]));
        let h = harness(bridge.clone(), 5, 3);
        seed_selector(&h.store, "sel-go", SelectorKind::Identifier, "go");

        let workflow = Workflow::new("slow", "qa")
            .with_step(WorkflowStep::new(
                0,
                Action::new("settle", ActionKind::WaitFor).with_param("delay_ms", 100),
            ))
            .with_step(click(1, "sel-go"));
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let report = h.orchestrator.run(&id, &route(), cancel).await.unwrap();

        assert_eq!(report.state, RunState::Aborted);
        // The in-flight step drained; the click slot never started.
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.step(0).unwrap().status, StepStatus::Success);
        assert!(bridge.op_log().is_empty());
    }

    #[tokio::test]
    async fn cached_extract_skips_resolution_on_the_second_run() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("h1").with_attr("id", "title").with_text("Welcome"),
        ]));
        let h = harness(bridge.clone(), 5, 3);
        seed_selector(&h.store, "sel-title", SelectorKind::Identifier, "title");

        let workflow = Workflow::new("read title", "qa").with_step(WorkflowStep::new(
            0,
            Action::new("read", ActionKind::ExtractText)
                .with_selector(SelectorId::from("sel-title")),
        ));
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        let first = h
            .orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.step(0).unwrap().output, Some(serde_json::json!("Welcome")));
        assert!(!first.step(0).unwrap().from_cache);
        let finds_after_first = bridge.total_find_count();

        let second = h
            .orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();
        let cached = second.step(0).unwrap();
        assert_eq!(cached.status, StepStatus::Success);
        assert!(cached.from_cache);
        assert_eq!(cached.attempts, 0);
        assert_eq!(cached.output, Some(serde_json::json!("Welcome")));
        assert_eq!(bridge.total_find_count(), finds_after_first);
    }

    #[tokio::test]
    async fn selector_history_is_persisted_after_steps() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("h1").with_attr("id", "title").with_text("Welcome"),
        ]));
        let h = harness(bridge, 5, 3);
        let selector = Selector::new(SelectorId::from("sel-title"), "demo.test", "title")
            .with_variant(
                SelectorVariant::new(SelectorKind::Identifier, "title")
                    .with_rate(0.5)
                    .active(),
            );
        h.store.insert_selector(selector);

        let workflow = Workflow::new("read title", "qa").with_step(WorkflowStep::new(
            0,
            Action::new("read", ActionKind::ExtractText)
                .with_selector(SelectorId::from("sel-title")),
        ));
        let id = workflow.id.clone();
        h.store.insert_workflow(workflow);

        h.orchestrator
            .run(&id, &route(), CancellationToken::new())
            .await
            .unwrap();

        let saved = h.store.selector(&SelectorId::from("sel-title")).unwrap();
        let active = saved.active_variant().unwrap();
        // One success against a 0.5 rate: 0.3 * 1 + 0.7 * 0.5.
        assert!((active.success_rate - 0.65).abs() < 1e-9);
        assert!(saved.last_snapshot.is_some());
    }

    #[tokio::test]
    async fn load_failures_surface_before_the_run_starts() {
        let bridge = Arc::new(ScriptedPageBridge::new());
        let h = harness(bridge, 5, 3);

        let missing = h
            .orchestrator
            .run(&WorkflowId::from("wf-unknown"), &route(), CancellationToken::new())
            .await;
        assert!(matches!(missing, Err(FlowError::WorkflowNotFound(_))));

        let gapped = Workflow::new("gapped", "qa")
            .with_step(WorkflowStep::new(
                0,
                Action::new("go", ActionKind::Navigate).with_param("url", "https://a.test"),
            ))
            .with_step(WorkflowStep::new(
                2,
                Action::new("go", ActionKind::Navigate).with_param("url", "https://b.test"),
            ));
        let id = gapped.id.clone();
        h.store.insert_workflow(gapped);
        let invalid = h.orchestrator.run(&id, &route(), CancellationToken::new()).await;
        assert!(matches!(invalid, Err(FlowError::InvalidStructure(_))));

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let never_started = h.orchestrator.run(&id, &route(), cancelled).await;
        assert!(matches!(never_started, Err(FlowError::RunCancelled)));
    }
}
