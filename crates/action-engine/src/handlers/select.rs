//! Dropdown option handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{BridgeError, ElementHandle, PageBridge, PageOp};

use crate::errors::ActionError;
use crate::handlers::{first_element, ActionHandler};
use crate::types::{Action, ActionKind};

pub struct SelectHandler {
    bridge: Arc<dyn PageBridge>,
}

impl SelectHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for SelectHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Select
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError> {
        let element = first_element(elements)?;
        let option = action
            .param_str("option")
            .ok_or_else(|| ActionError::Internal("select action without option".into()))?;
        debug!(element = %element.id, option, "selecting option");
        let op = PageOp::SelectOption { value: option.to_string() };
        match self.bridge.act(route, Some(element), op).await {
            Ok(_) => Ok(Value::Null),
            // A rejected select means the option list has no such entry.
            Err(BridgeError::OpRejected { .. }) => {
                Err(ActionError::OptionNotFound(option.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
