//! Action model: the closed set of supported kinds and the action record
//! a workflow step carries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use webloom_core_types::{ActionId, SelectorId};

/// Closed enumeration of everything the engine knows how to do to a page.
/// Unknown kinds are rejected at deserialization time rather than at
/// dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Fill,
    Select,
    Check,
    Scroll,
    WaitFor,
    ExtractText,
    ExtractAttribute,
    ExtractMany,
    Evaluate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 11] = [
        ActionKind::Navigate,
        ActionKind::Click,
        ActionKind::Fill,
        ActionKind::Select,
        ActionKind::Check,
        ActionKind::Scroll,
        ActionKind::WaitFor,
        ActionKind::ExtractText,
        ActionKind::ExtractAttribute,
        ActionKind::ExtractMany,
        ActionKind::Evaluate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Select => "select",
            ActionKind::Check => "check",
            ActionKind::Scroll => "scroll",
            ActionKind::WaitFor => "wait_for",
            ActionKind::ExtractText => "extract_text",
            ActionKind::ExtractAttribute => "extract_attribute",
            ActionKind::ExtractMany => "extract_many",
            ActionKind::Evaluate => "evaluate",
        }
    }

    /// Kinds that cannot run without a selector. `Navigate` forbids one and
    /// `WaitFor` may carry one or run as a plain delay.
    pub fn requires_selector(&self) -> bool {
        !matches!(self, ActionKind::Navigate | ActionKind::WaitFor)
    }

    /// Kinds resolved in many-element mode instead of unique mode.
    pub fn wants_many(&self) -> bool {
        matches!(self, ActionKind::ExtractMany)
    }

    /// Only read-only extraction results are safe to replay from cache.
    /// Mutating kinds must hit the page every time.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            ActionKind::ExtractText | ActionKind::ExtractAttribute | ActionKind::ExtractMany
        )
    }
}

/// One executable unit of page interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub name: String,
    pub kind: ActionKind,
    /// Logical selector reference, resolved through the selector engine
    /// before the handler runs. Presence rules come from the kind schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorId>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: ActionId::new(),
            name: name.into(),
            kind,
            selector: None,
            params: Map::new(),
        }
    }

    pub fn with_selector(mut self, selector: SelectorId) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    pub fn param_u64(&self, name: &str) -> Option<u64> {
        self.params.get(name).and_then(Value::as_u64)
    }

    pub fn param_bool(&self, name: &str) -> Option<bool> {
        self.params.get(name).and_then(Value::as_bool)
    }
}
