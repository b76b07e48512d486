//! Handler registry: maps each action kind to its handler.
//!
//! Dispatch is a map lookup, so an unregistered kind surfaces as a typed
//! error instead of a silent no-op. The standard registry covers every
//! kind; tests use partial registries to exercise the miss path.

use std::collections::HashMap;
use std::sync::Arc;

use webloom_page_bridge::PageBridge;

use crate::errors::ActionError;
use crate::handlers::{
    ActionHandler, CheckHandler, ClickHandler, EvaluateHandler, ExtractAttributeHandler,
    ExtractManyHandler, ExtractTextHandler, FillHandler, NavigateHandler, ScrollHandler,
    SelectHandler, WaitForHandler,
};
use crate::types::ActionKind;

pub struct HandlerRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    /// Registry with a handler for every supported kind.
    pub fn standard(bridge: Arc<dyn PageBridge>) -> Self {
        Self::with_handlers(vec![
            Arc::new(NavigateHandler::new(bridge.clone())),
            Arc::new(ClickHandler::new(bridge.clone())),
            Arc::new(FillHandler::new(bridge.clone())),
            Arc::new(SelectHandler::new(bridge.clone())),
            Arc::new(CheckHandler::new(bridge.clone())),
            Arc::new(ScrollHandler::new(bridge.clone())),
            Arc::new(WaitForHandler::new(bridge.clone())),
            Arc::new(ExtractTextHandler::new(bridge.clone())),
            Arc::new(ExtractAttributeHandler::new(bridge.clone())),
            Arc::new(ExtractManyHandler::new(bridge.clone())),
            Arc::new(EvaluateHandler::new(bridge)),
        ])
    }

    pub fn with_handlers(handlers: Vec<Arc<dyn ActionHandler>>) -> Self {
        let mut map: HashMap<ActionKind, Arc<dyn ActionHandler>> = HashMap::new();
        for handler in handlers {
            map.insert(handler.kind(), handler);
        }
        Self { handlers: map }
    }

    pub fn dispatch(&self, kind: ActionKind) -> Result<Arc<dyn ActionHandler>, ActionError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ActionError::UnknownKind(kind.name().to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
