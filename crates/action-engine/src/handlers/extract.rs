//! Extraction handlers. These are the read-only kinds whose outputs are
//! eligible for the result cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{ElementHandle, PageBridge, PageOp};

use crate::errors::ActionError;
use crate::handlers::{first_element, ActionHandler};
use crate::types::{Action, ActionKind};

/// Reads the trimmed text content of a single element.
pub struct ExtractTextHandler {
    bridge: Arc<dyn PageBridge>,
}

impl ExtractTextHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for ExtractTextHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ExtractText
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        _action: &Action,
    ) -> Result<Value, ActionError> {
        let element = first_element(elements)?;
        let text = self
            .bridge
            .act(route, Some(element), PageOp::ReadText)
            .await?;
        Ok(text)
    }
}

/// Reads one attribute of a single element; yields `null` when absent.
pub struct ExtractAttributeHandler {
    bridge: Arc<dyn PageBridge>,
}

impl ExtractAttributeHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for ExtractAttributeHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ExtractAttribute
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError> {
        let element = first_element(elements)?;
        let name = action
            .param_str("attribute")
            .ok_or_else(|| ActionError::Internal("extract_attribute without attribute".into()))?;
        let value = self
            .bridge
            .act(route, Some(element), PageOp::ReadAttribute { name: name.to_string() })
            .await?;
        Ok(value)
    }
}

/// Reads text (or an attribute, when `attribute` is given) from every
/// resolved element and yields them as an array in document order.
pub struct ExtractManyHandler {
    bridge: Arc<dyn PageBridge>,
}

impl ExtractManyHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for ExtractManyHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ExtractMany
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError> {
        let attribute = action.param_str("attribute");
        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
            let op = match attribute {
                Some(name) => PageOp::ReadAttribute { name: name.to_string() },
                None => PageOp::ReadText,
            };
            let value = self.bridge.act(route, Some(element), op).await?;
            items.push(value);
        }
        Ok(Value::Array(items))
    }
}
