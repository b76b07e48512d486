//! Document interaction port for the Webloom kernel.
//!
//! `PageBridge` is the only seam through which the engines touch a live
//! page. Production deployments implement it over a real driver; tests and
//! dry runs use [`ScriptedPageBridge`], an instrumented in-memory fake.

mod errors;
mod scripted;
mod types;

use async_trait::async_trait;
use webloom_core_types::{PageRoute, SelectorKind};

pub use errors::BridgeError;
pub use scripted::{ScriptedElement, ScriptedPageBridge};
pub use types::{ElementHandle, ElementSnapshot, PageOp};

/// Document interaction provider.
///
/// All operations are routed: callers must hold the route's serialization
/// key before mutating the page (the bridge itself does not lock).
#[async_trait]
pub trait PageBridge: Send + Sync {
    /// Return every element currently matching `value` under the given
    /// strategy family, in document order. An empty vector is not an error.
    async fn find_candidates(
        &self,
        route: &PageRoute,
        kind: SelectorKind,
        value: &str,
    ) -> Result<Vec<ElementHandle>, BridgeError>;

    /// Apply one operation to an element (or to the page when `target` is
    /// `None`, e.g. page-level scrolling). Read operations return their
    /// observation; mutations return `Value::Null`.
    async fn act(
        &self,
        route: &PageRoute,
        target: Option<&ElementHandle>,
        op: PageOp,
    ) -> Result<serde_json::Value, BridgeError>;

    /// Capture the current state of an element for later disambiguation and
    /// healing.
    async fn snapshot(
        &self,
        route: &PageRoute,
        target: &ElementHandle,
    ) -> Result<ElementSnapshot, BridgeError>;

    /// Load a document. Invalidates all previously issued handles.
    async fn navigate(&self, route: &PageRoute, url: &str) -> Result<(), BridgeError>;
}
