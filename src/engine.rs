//! Engine assembly.
//!
//! [`EngineBuilder`] wires the selector resolver, handler registry, retry
//! controller, result cache, and orchestrator from one [`EngineConfig`].
//! Callers supply the two ports the engine cannot invent: a page bridge
//! and a flow store. The event sink is optional and defaults to a no-op.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use webloom_action_engine::{HandlerRegistry, ResultCache, RetryController};
use webloom_core_types::{PageRoute, WorkflowId};
use webloom_flow_engine::{FlowError, FlowStore, Orchestrator, RunReport};
use webloom_page_bridge::PageBridge;
use webloom_run_events::{NoopEventSink, RunEventSink};
use webloom_selector_engine::{DefaultSelectorResolver, SelectorVault};

use crate::config::EngineConfig;
use crate::errors::EngineError;

pub struct Engine {
    config: EngineConfig,
    vault: Arc<SelectorVault>,
    orchestrator: Arc<Orchestrator>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Selector histories currently held in memory.
    pub fn vault(&self) -> &Arc<SelectorVault> {
        &self.vault
    }

    pub async fn run(
        &self,
        workflow_id: &WorkflowId,
        route: &PageRoute,
        cancel: CancellationToken,
    ) -> Result<RunReport, FlowError> {
        self.orchestrator.run(workflow_id, route, cancel).await
    }
}

#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    bridge: Option<Arc<dyn PageBridge>>,
    store: Option<Arc<dyn FlowStore>>,
    sink: Option<Arc<dyn RunEventSink>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn bridge(mut self, bridge: Arc<dyn PageBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn store(mut self, store: Arc<dyn FlowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RunEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config.unwrap_or_default();
        let bridge = self.bridge.ok_or(EngineError::MissingBridge)?;
        let store = self.store.ok_or(EngineError::MissingStore)?;
        let sink = self.sink.unwrap_or_else(NoopEventSink::new);

        let vault = Arc::new(SelectorVault::new());
        let resolver = Arc::new(DefaultSelectorResolver::standard(
            bridge.clone(),
            vault.clone(),
            config.resolver_tuning(),
            config.healer_tuning(),
        ));
        let registry = Arc::new(HandlerRegistry::standard(bridge));
        let retry = Arc::new(RetryController::new(config.retry_policy()));
        let cache = Arc::new(ResultCache::new(config.cache_capacity, config.cache_ttl()));
        let orchestrator = Arc::new(Orchestrator::new(
            resolver,
            registry,
            retry,
            cache,
            vault.clone(),
            store,
            sink,
            config.parallel_worker_limit,
        ));

        info!(
            workers = config.parallel_worker_limit,
            attempts = config.max_attempts,
            cache_capacity = config.cache_capacity,
            "engine assembled"
        );
        Ok(Engine {
            config,
            vault,
            orchestrator,
        })
    }
}
