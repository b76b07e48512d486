//! Checkbox state handler. Idempotent per the `checked` param: setting an
//! already-checked box to checked is a no-op on the page side.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{ElementHandle, PageBridge, PageOp};

use crate::errors::ActionError;
use crate::handlers::{first_element, ActionHandler};
use crate::types::{Action, ActionKind};

pub struct CheckHandler {
    bridge: Arc<dyn PageBridge>,
}

impl CheckHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for CheckHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Check
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError> {
        let element = first_element(elements)?;
        let checked = action
            .param_bool("checked")
            .ok_or_else(|| ActionError::Internal("check action without checked flag".into()))?;
        self.bridge
            .act(route, Some(element), PageOp::SetChecked { checked })
            .await?;
        Ok(Value::Null)
    }
}
