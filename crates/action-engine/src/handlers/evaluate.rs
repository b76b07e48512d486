//! Assertion handler. Reads page state and fails the action when the
//! asserted condition does not hold, so workflows can gate on content.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{ElementHandle, PageBridge, PageOp};

use crate::errors::ActionError;
use crate::handlers::{first_element, ActionHandler};
use crate::types::{Action, ActionKind};

pub struct EvaluateHandler {
    bridge: Arc<dyn PageBridge>,
}

impl EvaluateHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }

    async fn read_text(
        &self,
        route: &PageRoute,
        element: &ElementHandle,
    ) -> Result<String, ActionError> {
        let value = self
            .bridge
            .act(route, Some(element), PageOp::ReadText)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl ActionHandler for EvaluateHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Evaluate
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError> {
        let element = first_element(elements)?;
        let mode = action
            .param_str("assert")
            .ok_or_else(|| ActionError::Internal("evaluate action without assert mode".into()))?;
        let expected = action.param_str("expected").unwrap_or_default();

        match mode {
            "visible" => {
                let seen = self
                    .bridge
                    .act(route, Some(element), PageOp::ReadVisible)
                    .await?;
                if !seen.as_bool().unwrap_or(false) {
                    return Err(ActionError::Assertion(format!(
                        "element '{}' is not visible",
                        element.id
                    )));
                }
            }
            "text_equals" => {
                let actual = self.read_text(route, element).await?;
                if actual != expected {
                    return Err(ActionError::Assertion(format!(
                        "expected text '{expected}', found '{actual}'"
                    )));
                }
            }
            "text_contains" => {
                let actual = self.read_text(route, element).await?;
                if !actual.contains(expected) {
                    return Err(ActionError::Assertion(format!(
                        "text '{actual}' does not contain '{expected}'"
                    )));
                }
            }
            "attribute_equals" => {
                let name = action.param_str("attribute").ok_or_else(|| {
                    ActionError::Internal("attribute_equals without attribute".into())
                })?;
                let value = self
                    .bridge
                    .act(route, Some(element), PageOp::ReadAttribute { name: name.to_string() })
                    .await?;
                let actual = value.as_str().map(str::to_string);
                if actual.as_deref() != Some(expected) {
                    return Err(ActionError::Assertion(format!(
                        "attribute '{name}' expected '{expected}', found '{}'",
                        actual.as_deref().unwrap_or("<absent>")
                    )));
                }
            }
            other => {
                return Err(ActionError::Internal(format!(
                    "unsupported assertion mode '{other}'"
                )));
            }
        }
        Ok(Value::Bool(true))
    }
}
