//! Navigation handler. The only kind that addresses a page rather than an
//! element.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{ElementHandle, PageBridge};

use crate::errors::ActionError;
use crate::handlers::ActionHandler;
use crate::types::{Action, ActionKind};

pub struct NavigateHandler {
    bridge: Arc<dyn PageBridge>,
}

impl NavigateHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl ActionHandler for NavigateHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Navigate
    }

    async fn execute(
        &self,
        route: &PageRoute,
        _elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError> {
        let url = action
            .param_str("url")
            .ok_or_else(|| ActionError::Internal("navigate action without url".into()))?;
        debug!(page = %route.page, url, "navigating");
        self.bridge.navigate(route, url).await?;
        Ok(Value::Null)
    }
}
