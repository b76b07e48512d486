//! Text entry handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{ElementHandle, PageBridge, PageOp};

use crate::errors::ActionError;
use crate::handlers::{first_element, ActionHandler};
use crate::types::{Action, ActionKind};

pub struct FillHandler {
    bridge: Arc<dyn PageBridge>,
}

impl FillHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for FillHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Fill
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError> {
        let element = first_element(elements)?;
        let text = action
            .param_str("text")
            .ok_or_else(|| ActionError::Internal("fill action without text".into()))?;
        debug!(element = %element.id, chars = text.len(), "filling");
        self.bridge
            .act(route, Some(element), PageOp::Fill { text: text.to_string() })
            .await?;
        Ok(Value::Null)
    }
}
