//! Bridge-level failures.

use thiserror::Error;

/// Errors surfaced by a document interaction provider.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    /// Connection to the rendering engine failed or timed out.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The referenced handle no longer points at a live element.
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// The element exists but cannot satisfy the operation.
    #[error("operation {op} rejected: {reason}")]
    OpRejected { op: String, reason: String },

    /// Navigation did not complete.
    #[error("navigation failed: {0}")]
    Navigation(String),
}

impl BridgeError {
    /// Transport faults are transient; everything else reflects page state
    /// and will not improve by repeating the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_retryable() {
        assert!(BridgeError::Transport("reset".into()).is_retryable());
        assert!(!BridgeError::NoSuchElement("h9".into()).is_retryable());
        assert!(!BridgeError::OpRejected {
            op: "fill".into(),
            reason: "not an input".into()
        }
        .is_retryable());
        assert!(!BridgeError::Navigation("dns".into()).is_retryable());
    }
}
