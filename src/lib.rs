//! Webloom: self-healing web automation workflows.
//!
//! The workspace splits into focused crates; this facade re-exports the
//! surface integrators reach for and adds the pieces only the top level
//! owns: configuration layering, engine assembly, and bundle files.

pub mod bundle;
pub mod config;
pub mod engine;
pub mod errors;

pub use bundle::{DocumentElement, RunBundle};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use errors::{BundleError, EngineError};

// Re-export commonly used types for external use
pub use webloom_action_engine::{Action, ActionKind};
pub use webloom_core_types::{
    PageId, PageRoute, RunId, SelectorId, SelectorKind, SessionId, StepId, WorkflowId,
};
pub use webloom_flow_engine::{
    FlowError, FlowStore, InMemoryFlowStore, Orchestrator, RunReport, StepCondition, StepReport,
    StepStatus, Workflow, WorkflowStep,
};
pub use webloom_page_bridge::{ElementSnapshot, PageBridge, ScriptedElement, ScriptedPageBridge};
pub use webloom_run_events::{
    InMemoryEventSink, NoopEventSink, RunEvent, RunEventKind, RunEventSink, RunState,
};
pub use webloom_selector_engine::{Selector, SelectorResolver, SelectorVariant, SelectorVault};
