//! Resolution error taxonomy.

use thiserror::Error;
use webloom_core_types::{SelectorId, SelectorKind};
use webloom_page_bridge::BridgeError;

#[derive(Debug, Error)]
pub enum SelectorError {
    /// The id is not present in the vault.
    #[error("selector {0} is not registered")]
    Unknown(SelectorId),

    /// Every eligible variant was tried and none produced a usable match.
    #[error("no element matched selector {selector_id} after trying {tried} variants")]
    NotFound { selector_id: SelectorId, tried: usize },

    /// The active variant never appeared within the resolve deadline.
    #[error("selector {selector_id} did not appear within {waited_ms}ms")]
    Timeout { selector_id: SelectorId, waited_ms: u64 },

    /// A unique match was required but several candidates remained after
    /// snapshot disambiguation.
    #[error("selector {selector_id} matched {count} elements where exactly one was required")]
    Ambiguous { selector_id: SelectorId, count: usize },

    /// The variant value does not parse for its strategy family.
    #[error("invalid {kind} value {value:?}: {reason}")]
    InvalidValue {
        kind: SelectorKind,
        value: String,
        reason: String,
    },

    #[error("bridge failure: {0}")]
    Bridge(#[from] BridgeError),

    #[error("self-heal failed for selector {selector_id}: {reason}")]
    HealFailed {
        selector_id: SelectorId,
        reason: String,
    },
}

impl SelectorError {
    /// Whether the same resolution may succeed on a later attempt.
    ///
    /// Absence and slowness are transient page conditions; ambiguity and
    /// malformed values are not, repeating them would act on the wrong
    /// element or fail identically.
    pub fn is_retryable(&self) -> bool {
        match self {
            SelectorError::NotFound { .. } | SelectorError::Timeout { .. } => true,
            SelectorError::Bridge(err) => err.is_retryable(),
            SelectorError::Unknown(_)
            | SelectorError::Ambiguous { .. }
            | SelectorError::InvalidValue { .. }
            | SelectorError::HealFailed { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        let id = SelectorId::from("sel-1");
        assert!(SelectorError::NotFound {
            selector_id: id.clone(),
            tried: 2
        }
        .is_retryable());
        assert!(SelectorError::Timeout {
            selector_id: id.clone(),
            waited_ms: 500
        }
        .is_retryable());
        assert!(SelectorError::Bridge(BridgeError::Transport("reset".into())).is_retryable());

        assert!(!SelectorError::Ambiguous {
            selector_id: id.clone(),
            count: 3
        }
        .is_retryable());
        assert!(!SelectorError::Unknown(id.clone()).is_retryable());
        assert!(!SelectorError::InvalidValue {
            kind: SelectorKind::Attribute,
            value: "no-equals".into(),
            reason: "missing '='".into()
        }
        .is_retryable());
    }
}
