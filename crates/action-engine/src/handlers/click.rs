//! Click handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{ElementHandle, PageBridge, PageOp};

use crate::errors::ActionError;
use crate::handlers::{first_element, ActionHandler};
use crate::types::{Action, ActionKind};

pub struct ClickHandler {
    bridge: Arc<dyn PageBridge>,
}

impl ClickHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for ClickHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Click
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        _action: &Action,
    ) -> Result<Value, ActionError> {
        let element = first_element(elements)?;
        debug!(element = %element.id, "clicking");
        self.bridge.act(route, Some(element), PageOp::Click).await?;
        Ok(Value::Null)
    }
}
