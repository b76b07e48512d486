//! Shared identifiers and routing types used across the Webloom kernel crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

string_id!(
    /// Identifies a logical selector record, stable across heals.
    SelectorId
);
string_id!(
    /// Identifies a single action invocation.
    ActionId
);
string_id!(
    /// Identifies a workflow definition.
    WorkflowId
);
string_id!(
    /// Identifies one execution of a workflow.
    RunId
);
string_id!(
    /// Identifies a step inside a workflow definition.
    StepId
);
string_id!(SessionId);
string_id!(PageId);

/// Strategy family a selector variant belongs to.
///
/// Ordering of `ALL` is the preference order used when generating
/// replacement variants from a snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Unique identifier lookups (`#id`, `[name=..]`).
    Identifier,
    /// Stable attribute lookups (`[data-testid=..]`, `[aria-label=..]`).
    Attribute,
    /// Visible-text lookups.
    Text,
    /// Positional CSS / XPath paths.
    Structural,
}

impl SelectorKind {
    pub const ALL: [SelectorKind; 4] = [
        SelectorKind::Identifier,
        SelectorKind::Attribute,
        SelectorKind::Text,
        SelectorKind::Structural,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SelectorKind::Identifier => "identifier",
            SelectorKind::Attribute => "attribute",
            SelectorKind::Text => "text",
            SelectorKind::Structural => "structural",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved routing target for document operations.
///
/// `mutex_key` is the serialization key: operations sharing a key must not
/// run concurrently against the document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PageRoute {
    pub session: SessionId,
    pub page: PageId,
    pub mutex_key: String,
}

impl PageRoute {
    pub fn new(session: SessionId, page: PageId) -> Self {
        let mutex_key = format!("page:{}", page.0);
        Self {
            session,
            page,
            mutex_key,
        }
    }
}

impl fmt::Display for PageRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session={} page={} mutex={}",
            self.session.0, self.page.0, self.mutex_key
        )
    }
}
