//! Action handlers.
//!
//! One handler per action kind, each talking to the page through the
//! bridge port. Handlers assume schema validation already ran; they still
//! guard their inputs so a direct caller gets an error instead of a panic.

use async_trait::async_trait;
use serde_json::Value;

use webloom_core_types::PageRoute;
use webloom_page_bridge::ElementHandle;

use crate::errors::ActionError;
use crate::types::{Action, ActionKind};

pub mod check;
pub mod click;
pub mod evaluate;
pub mod extract;
pub mod fill;
pub mod navigate;
pub mod scroll;
pub mod select;
pub mod wait;

pub use check::CheckHandler;
pub use click::ClickHandler;
pub use evaluate::EvaluateHandler;
pub use extract::{ExtractAttributeHandler, ExtractManyHandler, ExtractTextHandler};
pub use fill::FillHandler;
pub use navigate::NavigateHandler;
pub use scroll::ScrollHandler;
pub use select::SelectHandler;
pub use wait::WaitForHandler;

/// Contract every action kind implements.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The kind this handler serves in the registry.
    fn kind(&self) -> ActionKind;

    /// Run the action against the page. `elements` is the resolution output
    /// for kinds that carry a selector, in document order; selector-free
    /// kinds receive an empty slice.
    async fn execute(
        &self,
        route: &PageRoute,
        elements: &[ElementHandle],
        action: &Action,
    ) -> Result<Value, ActionError>;
}

impl std::fmt::Debug for dyn ActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ActionHandler").field(&self.kind()).finish()
    }
}

/// Single-target kinds act on the first resolved element.
pub(crate) fn first_element(elements: &[ElementHandle]) -> Result<&ElementHandle, ActionError> {
    elements.first().ok_or(ActionError::MissingElement)
}
