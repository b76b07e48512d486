//! Settling handler: plain delays and visibility polls.
//!
//! When the action carries a selector, resolution has already confirmed the
//! element exists; this handler polls until it also reports visible. A bare
//! `delay_ms` action sleeps without touching the page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::debug;

use webloom_core_types::PageRoute;
use webloom_page_bridge::{ElementHandle, PageBridge, PageOp};

use crate::errors::ActionError;
use crate::handlers::ActionHandler;
use crate::types::{Action, ActionKind};

pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct WaitForHandler {
    bridge: Arc<dyn PageBridge>,
}

impl WaitForHandler {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }

    async fn wait_visible(
        &self,
        route: &PageRoute,
        element: &ElementHandle,
        timeout: Duration,
    ) -> Result<(), ActionError> {
        let started = Instant::now();
        loop {
            let seen = self
                .bridge
                .act(route, Some(element), PageOp::ReadVisible)
                .await?;
            if seen.as_bool().unwrap_or(false) {
                return Ok(());
            }
            if started.elapsed() + POLL_INTERVAL > timeout {
                return Err(ActionError::WaitTimeout(timeout.as_millis() as u64));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ActionHandler for WaitForHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::WaitFor
    }

    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError> {
        if let Some(delay_ms) = action.param_u64("delay_ms") {
            debug!(delay_ms, "waiting for fixed delay");
            sleep(Duration::from_millis(delay_ms)).await;
        }
        if let Some(element) = elements.first() {
            let timeout_ms = action.param_u64("timeout_ms").unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);
            self.wait_visible(route, element, Duration::from_millis(timeout_ms))
                .await?;
        }
        Ok(Value::Null)
    }
}
