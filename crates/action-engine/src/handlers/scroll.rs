//! Scroll-into-view handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{ElementHandle, PageBridge, PageOp};

use crate::errors::ActionError;
use crate::handlers::{first_element, ActionHandler};
use crate::types::{Action, ActionKind};

pub struct ScrollHandler {
    bridge: Arc<dyn PageBridge>,
}

impl ScrollHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for ScrollHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Scroll
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        _action: &Action,
    ) -> Result<Value, ActionError> {
        let element = first_element(elements)?;
        self.bridge
            .act(route, Some(element), PageOp::ScrollIntoView)
            .await?;
        Ok(Value::Null)
    }
}
