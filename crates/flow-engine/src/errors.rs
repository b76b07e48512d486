//! Flow-level error types.

use thiserror::Error;
use webloom_core_types::WorkflowId;

/// Failures from the persistence port.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io: {0}")]
    Io(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("invalid workflow structure: {0}")]
    InvalidStructure(String),

    #[error("run cancelled before it started")]
    RunCancelled,

    #[error("step {order} aborted the run: {reason}")]
    StepAborted { order: u32, reason: String },

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("internal flow error: {0}")]
    Internal(String),
}
