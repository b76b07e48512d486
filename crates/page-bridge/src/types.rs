//! Element handles, snapshots, and the low-level operation vocabulary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a concrete element on the live page.
///
/// Handles are bridge-scoped and become invalid after navigation. The light
/// metadata carried here lets callers rank multiple matches without another
/// round trip.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Opaque id understood by the bridge that produced the handle.
    pub id: String,
    pub tag: String,
    pub text: Option<String>,
    /// Position in document order among the handles of one query.
    pub dom_index: usize,
}

/// Captured state of an element at the moment of a successful resolution.
///
/// Snapshots feed two consumers: disambiguation when a later query returns
/// several candidates, and replacement-value generation during self-healing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    /// Attributes as captured, sorted by name (`id`, `name`, `class`,
    /// `data-*`, `aria-*`, ...).
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    /// Structural path of the element at capture time.
    pub css_path: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Trimmed visible text, `None` when empty.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Low-level operation applied to a page or element.
///
/// The vocabulary is intentionally closed; higher-level action semantics
/// (validation, retries, caching) live above the bridge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PageOp {
    Click,
    Fill { text: String },
    SelectOption { value: String },
    SetChecked { checked: bool },
    ScrollIntoView,
    ReadText,
    ReadAttribute { name: String },
    ReadVisible,
}

impl PageOp {
    pub fn name(&self) -> &'static str {
        match self {
            PageOp::Click => "click",
            PageOp::Fill { .. } => "fill",
            PageOp::SelectOption { .. } => "select_option",
            PageOp::SetChecked { .. } => "set_checked",
            PageOp::ScrollIntoView => "scroll_into_view",
            PageOp::ReadText => "read_text",
            PageOp::ReadAttribute { .. } => "read_attribute",
            PageOp::ReadVisible => "read_visible",
        }
    }

    /// True for operations that only observe the page.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            PageOp::ReadText | PageOp::ReadAttribute { .. } | PageOp::ReadVisible
        )
    }
}
