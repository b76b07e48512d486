//! Error types for action validation and execution.

use thiserror::Error;
use webloom_page_bridge::BridgeError;
use webloom_selector_engine::SelectorError;

/// Errors raised while running a single action handler.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("no handler registered for action kind '{0}'")]
    UnknownKind(String),

    #[error("action requires a resolved element but none was provided")]
    MissingElement,

    #[error("option not found: {0}")]
    OptionNotFound(String),

    #[error("wait timed out after {0}ms")]
    WaitTimeout(u64),

    #[error("page bridge failure: {0}")]
    Bridge(#[from] BridgeError),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("internal action error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Whether another attempt against the same page could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ActionError::WaitTimeout(_) => true,
            ActionError::Bridge(err) => err.is_retryable(),
            ActionError::UnknownKind(_)
            | ActionError::MissingElement
            | ActionError::OptionNotFound(_)
            | ActionError::Assertion(_)
            | ActionError::Internal(_) => false,
        }
    }
}

/// Structural schema failures. Always fatal: retrying an action whose
/// parameters are malformed cannot change the outcome.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("schema violation at '{field}': {reason}")]
    SchemaViolation { field: String, reason: String },
}

impl ValidationError {
    pub fn violation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::SchemaViolation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Unified error for one resolve-and-execute pipeline pass. The retry
/// controller classifies these to decide between another attempt and an
/// immediate failure.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("selector resolution failed: {0}")]
    Selector(#[from] SelectorError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("action failed: {0}")]
    Action(#[from] ActionError),

    #[error("execution cancelled")]
    Cancelled,

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<ExecError> },
}

impl ExecError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecError::Selector(err) => err.is_retryable(),
            ExecError::Action(err) => err.is_retryable(),
            ExecError::Validation(_) | ExecError::Cancelled | ExecError::Exhausted { .. } => false,
        }
    }
}
