//! Structural validation for actions.
//!
//! Every action kind carries a closed parameter schema. Validation is pure:
//! it inspects the action record and never touches the page, so a malformed
//! action is rejected before any resolution or bridge traffic happens.

use serde_json::Value;

use crate::errors::ValidationError;
use crate::types::{Action, ActionKind};

/// Assertion modes accepted by the `evaluate` kind.
pub const EVALUATE_ASSERTIONS: [&str; 4] =
    ["text_equals", "text_contains", "attribute_equals", "visible"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorRule {
    Required,
    Forbidden,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Uint,
    Bool,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::Str => value.is_string(),
            ParamType::Uint => value.is_u64(),
            ParamType::Bool => value.is_boolean(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ParamType::Str => "string",
            ParamType::Uint => "unsigned integer",
            ParamType::Bool => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
}

const fn required(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec { name, ty, required: true }
}

const fn optional(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec { name, ty, required: false }
}

/// Schema for one action kind: the selector presence rule plus the full
/// set of recognized parameters. Keys outside this set are violations.
#[derive(Debug, Clone, Copy)]
pub struct KindSchema {
    pub selector: SelectorRule,
    pub params: &'static [ParamSpec],
}

static NAVIGATE: KindSchema = KindSchema {
    selector: SelectorRule::Forbidden,
    params: &[required("url", ParamType::Str)],
};
static CLICK: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[],
};
static FILL: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[required("text", ParamType::Str)],
};
static SELECT: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[required("option", ParamType::Str)],
};
static CHECK: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[required("checked", ParamType::Bool)],
};
static SCROLL: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[],
};
static WAIT_FOR: KindSchema = KindSchema {
    selector: SelectorRule::Optional,
    params: &[
        optional("delay_ms", ParamType::Uint),
        optional("timeout_ms", ParamType::Uint),
    ],
};
static EXTRACT_TEXT: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[],
};
static EXTRACT_ATTRIBUTE: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[required("attribute", ParamType::Str)],
};
static EXTRACT_MANY: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[optional("attribute", ParamType::Str)],
};
static EVALUATE: KindSchema = KindSchema {
    selector: SelectorRule::Required,
    params: &[
        required("assert", ParamType::Str),
        optional("expected", ParamType::Str),
        optional("attribute", ParamType::Str),
    ],
};

pub fn schema_for(kind: ActionKind) -> &'static KindSchema {
    match kind {
        ActionKind::Navigate => &NAVIGATE,
        ActionKind::Click => &CLICK,
        ActionKind::Fill => &FILL,
        ActionKind::Select => &SELECT,
        ActionKind::Check => &CHECK,
        ActionKind::Scroll => &SCROLL,
        ActionKind::WaitFor => &WAIT_FOR,
        ActionKind::ExtractText => &EXTRACT_TEXT,
        ActionKind::ExtractAttribute => &EXTRACT_ATTRIBUTE,
        ActionKind::ExtractMany => &EXTRACT_MANY,
        ActionKind::Evaluate => &EVALUATE,
    }
}

/// Validate one action against its kind schema.
pub fn validate(action: &Action) -> Result<(), ValidationError> {
    let schema = schema_for(action.kind);

    match (schema.selector, action.selector.is_some()) {
        (SelectorRule::Required, false) => {
            return Err(ValidationError::violation(
                "selector",
                format!("kind '{}' requires a selector", action.kind.name()),
            ));
        }
        (SelectorRule::Forbidden, true) => {
            return Err(ValidationError::violation(
                "selector",
                format!("kind '{}' does not take a selector", action.kind.name()),
            ));
        }
        _ => {}
    }

    for key in action.params.keys() {
        if !schema.params.iter().any(|spec| spec.name == key) {
            return Err(ValidationError::violation(
                format!("params.{key}"),
                format!("unknown parameter for kind '{}'", action.kind.name()),
            ));
        }
    }

    for spec in schema.params {
        match action.params.get(spec.name) {
            Some(value) => {
                if !spec.ty.matches(value) {
                    return Err(ValidationError::violation(
                        format!("params.{}", spec.name),
                        format!("expected {}", spec.ty.name()),
                    ));
                }
            }
            None if spec.required => {
                return Err(ValidationError::violation(
                    format!("params.{}", spec.name),
                    "required parameter is missing",
                ));
            }
            None => {}
        }
    }

    validate_cross_fields(action)
}

fn validate_cross_fields(action: &Action) -> Result<(), ValidationError> {
    match action.kind {
        ActionKind::Navigate => {
            if action.param_str("url").is_some_and(|url| url.trim().is_empty()) {
                return Err(ValidationError::violation("params.url", "url must not be empty"));
            }
        }
        ActionKind::ExtractAttribute => {
            if action
                .param_str("attribute")
                .is_some_and(|name| name.trim().is_empty())
            {
                return Err(ValidationError::violation(
                    "params.attribute",
                    "attribute name must not be empty",
                ));
            }
        }
        ActionKind::WaitFor => {
            if action.selector.is_none() && action.param_u64("delay_ms").is_none() {
                return Err(ValidationError::violation(
                    "params.delay_ms",
                    "wait_for needs a selector to wait on or an explicit delay_ms",
                ));
            }
        }
        ActionKind::Evaluate => {
            let mode = action.param_str("assert").unwrap_or_default();
            if !EVALUATE_ASSERTIONS.contains(&mode) {
                return Err(ValidationError::violation(
                    "params.assert",
                    format!("unknown assertion '{mode}'"),
                ));
            }
            if mode != "visible" && action.param_str("expected").is_none() {
                return Err(ValidationError::violation(
                    "params.expected",
                    format!("assertion '{mode}' needs an expected value"),
                ));
            }
            if mode == "attribute_equals" && action.param_str("attribute").is_none() {
                return Err(ValidationError::violation(
                    "params.attribute",
                    "attribute_equals needs an attribute name",
                ));
            }
        }
        _ => {}
    }
    Ok(())
}
