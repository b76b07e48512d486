//! Workflow orchestration for webloom.
//!
//! A workflow is an ordered list of steps, each wrapping one action. The
//! orchestrator walks the order, evaluates step conditions, runs parallel
//! groups under a bounded worker pool, retries through the action engine,
//! and reports every transition through the run event sink. Persistence
//! goes through the [`FlowStore`] port so callers choose where workflows,
//! selectors, and step reports live.

pub mod errors;
pub mod model;
pub mod orchestrator;
pub mod state;
pub mod store;

pub use errors::{FlowError, StoreError};
pub use model::{
    RunReport, StepCondition, StepReport, StepStatus, Workflow, WorkflowStep,
};
pub use orchestrator::Orchestrator;
pub use state::{RunMachine, StepMachine};
pub use store::{FlowStore, InMemoryFlowStore};
