//! Locator strategies.
//!
//! Four families in generate-priority order:
//! 1. Identifier - id / name attribute lookup
//! 2. Attribute  - stable `name=value` attribute pairs
//! 3. Text       - visible text content
//! 4. Structural - CSS-like positional paths
//!
//! Each strategy validates values of its family, queries the page through
//! the bridge, and can derive a replacement value from an element snapshot
//! (the healer's "generate mode").

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use webloom_core_types::{PageRoute, SelectorKind};
use webloom_page_bridge::{ElementHandle, ElementSnapshot, PageBridge};

use crate::errors::SelectorError;

/// Attributes considered stable enough to heal against, most trusted first.
const STABLE_ATTRIBUTES: [&str; 7] = [
    "data-testid",
    "data-test",
    "data-qa",
    "aria-label",
    "name",
    "title",
    "placeholder",
];

/// Longest text value the text strategy will generate from a snapshot.
const MAX_GENERATED_TEXT: usize = 60;

/// One strategy family.
#[async_trait]
pub trait LocatorStrategy: Send + Sync {
    fn kind(&self) -> SelectorKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Validate `value` for this family, then query the page for matches.
    async fn locate(
        &self,
        route: &PageRoute,
        value: &str,
    ) -> Result<Vec<ElementHandle>, SelectorError>;

    /// Derive a fresh candidate value of this family from the last known
    /// state of the element. `None` when the snapshot carries nothing
    /// usable for this family.
    fn generate(&self, snapshot: &ElementSnapshot) -> Option<String>;
}

fn invalid(kind: SelectorKind, value: &str, reason: &str) -> SelectorError {
    SelectorError::InvalidValue {
        kind,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Lookup by `id` or `name` attribute.
pub struct IdentifierStrategy {
    bridge: Arc<dyn PageBridge>,
}

impl IdentifierStrategy {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl LocatorStrategy for IdentifierStrategy {
    fn kind(&self) -> SelectorKind {
        SelectorKind::Identifier
    }

    async fn locate(
        &self,
        route: &PageRoute,
        value: &str,
    ) -> Result<Vec<ElementHandle>, SelectorError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(invalid(self.kind(), value, "empty identifier"));
        }
        if value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
            return Err(invalid(
                self.kind(),
                value,
                "identifiers may not contain whitespace or quotes",
            ));
        }
        debug!("identifier lookup: {}", value);
        Ok(self
            .bridge
            .find_candidates(route, self.kind(), value)
            .await?)
    }

    fn generate(&self, snapshot: &ElementSnapshot) -> Option<String> {
        snapshot
            .attr("id")
            .or_else(|| snapshot.attr("name"))
            .filter(|v| !v.is_empty())
            .map(String::from)
    }
}

/// Lookup by a single `name=value` attribute pair.
pub struct AttributeStrategy {
    bridge: Arc<dyn PageBridge>,
}

impl AttributeStrategy {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl LocatorStrategy for AttributeStrategy {
    fn kind(&self) -> SelectorKind {
        SelectorKind::Attribute
    }

    async fn locate(
        &self,
        route: &PageRoute,
        value: &str,
    ) -> Result<Vec<ElementHandle>, SelectorError> {
        let (attr, _) = value
            .split_once('=')
            .ok_or_else(|| invalid(self.kind(), value, "expected name=value"))?;
        if attr.trim().is_empty() {
            return Err(invalid(self.kind(), value, "empty attribute name"));
        }
        debug!("attribute lookup: {}", value);
        Ok(self
            .bridge
            .find_candidates(route, self.kind(), value)
            .await?)
    }

    fn generate(&self, snapshot: &ElementSnapshot) -> Option<String> {
        STABLE_ATTRIBUTES.iter().find_map(|attr| {
            snapshot
                .attr(attr)
                .filter(|v| !v.is_empty())
                .map(|v| format!("{attr}={v}"))
        })
    }
}

/// Lookup by visible text content.
pub struct TextStrategy {
    bridge: Arc<dyn PageBridge>,
}

impl TextStrategy {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl LocatorStrategy for TextStrategy {
    fn kind(&self) -> SelectorKind {
        SelectorKind::Text
    }

    async fn locate(
        &self,
        route: &PageRoute,
        value: &str,
    ) -> Result<Vec<ElementHandle>, SelectorError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(invalid(self.kind(), value, "empty text"));
        }
        debug!("text lookup: {:?}", trimmed);
        Ok(self
            .bridge
            .find_candidates(route, self.kind(), trimmed)
            .await?)
    }

    fn generate(&self, snapshot: &ElementSnapshot) -> Option<String> {
        let text = snapshot.trimmed_text()?;
        Some(text.chars().take(MAX_GENERATED_TEXT).collect())
    }
}

/// Lookup by CSS-like structural path.
pub struct StructuralStrategy {
    bridge: Arc<dyn PageBridge>,
}

impl StructuralStrategy {
    pub fn new(bridge: Arc<dyn PageBridge>) -> Self {
        Self { bridge }
    }

    fn balanced_brackets(value: &str) -> bool {
        let mut depth = 0i32;
        for c in value.chars() {
            match c {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
        depth == 0
    }
}

#[async_trait]
impl LocatorStrategy for StructuralStrategy {
    fn kind(&self) -> SelectorKind {
        SelectorKind::Structural
    }

    async fn locate(
        &self,
        route: &PageRoute,
        value: &str,
    ) -> Result<Vec<ElementHandle>, SelectorError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(invalid(self.kind(), value, "empty path"));
        }
        if !Self::balanced_brackets(value) {
            return Err(invalid(self.kind(), value, "unbalanced brackets"));
        }
        debug!("structural lookup: {}", value);
        Ok(self
            .bridge
            .find_candidates(route, self.kind(), value)
            .await?)
    }

    fn generate(&self, snapshot: &ElementSnapshot) -> Option<String> {
        snapshot.css_path.clone().filter(|p| !p.is_empty())
    }
}

/// The closed set of strategies, indexed by kind and iterable in
/// generate-priority order.
pub struct StrategySet {
    strategies: Vec<Arc<dyn LocatorStrategy>>,
}

impl StrategySet {
    /// All four standard strategies over one bridge.
    pub fn standard(bridge: Arc<dyn PageBridge>) -> Self {
        Self {
            strategies: vec![
                Arc::new(IdentifierStrategy::new(bridge.clone())),
                Arc::new(AttributeStrategy::new(bridge.clone())),
                Arc::new(TextStrategy::new(bridge.clone())),
                Arc::new(StructuralStrategy::new(bridge)),
            ],
        }
    }

    /// Custom set, mainly for tests stubbing individual families.
    pub fn with_strategies(strategies: Vec<Arc<dyn LocatorStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn get(&self, kind: SelectorKind) -> Option<&dyn LocatorStrategy> {
        self.strategies
            .iter()
            .find(|s| s.kind() == kind)
            .map(|s| s.as_ref())
    }

    /// Iterate in generate-priority order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn LocatorStrategy> {
        self.strategies.iter().map(|s| s.as_ref())
    }
}
