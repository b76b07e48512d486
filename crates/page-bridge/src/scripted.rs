//! Instrumented in-memory bridge for tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use webloom_core_types::{PageRoute, SelectorKind};

use crate::errors::BridgeError;
use crate::types::{ElementHandle, ElementSnapshot, PageOp};
use crate::PageBridge;

/// One element of a scripted document.
#[derive(Clone, Debug, Default)]
pub struct ScriptedElement {
    handle_id: String,
    tag: String,
    attributes: BTreeMap<String, String>,
    text: Option<String>,
    css_path: Option<String>,
    options: Vec<String>,
    visible: bool,
}

impl ScriptedElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            handle_id: String::new(),
            tag: tag.into(),
            attributes: BTreeMap::new(),
            text: None,
            css_path: None,
            options: Vec::new(),
            visible: true,
        }
    }

    /// Override the auto-assigned handle id.
    pub fn with_handle_id(mut self, id: impl Into<String>) -> Self {
        self.handle_id = id.into();
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_css_path(mut self, path: impl Into<String>) -> Self {
        self.css_path = Some(path.into());
        self
    }

    pub fn with_options(mut self, options: Vec<&str>) -> Self {
        self.options = options.into_iter().map(String::from).collect();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn matches(&self, kind: SelectorKind, value: &str) -> bool {
        match kind {
            SelectorKind::Identifier => {
                self.attr("id") == Some(value) || self.attr("name") == Some(value)
            }
            SelectorKind::Attribute => match value.split_once('=') {
                Some((name, expected)) => self.attr(name.trim()) == Some(expected.trim()),
                None => false,
            },
            SelectorKind::Text => self
                .text
                .as_deref()
                .map(|t| t.trim().contains(value))
                .unwrap_or(false),
            SelectorKind::Structural => {
                if self.css_path.as_deref() == Some(value) || self.tag == value {
                    return true;
                }
                if let Some(class) = value.strip_prefix('.') {
                    return self
                        .attr("class")
                        .map(|c| c.split_whitespace().any(|t| t == class))
                        .unwrap_or(false);
                }
                if let Some(id) = value.strip_prefix('#') {
                    return self.attr("id") == Some(id);
                }
                false
            }
        }
    }
}

#[derive(Default)]
struct BridgeStats {
    finds: HashMap<(SelectorKind, String), usize>,
    navigations: usize,
    ops: Vec<(String, PageOp)>,
}

/// In-memory [`PageBridge`] driven entirely by scripted documents.
///
/// Every call is counted, concurrent `act` calls are tracked with a
/// high-water mark, and transport failures can be injected, which makes the
/// bridge suitable for asserting *how* the engines talked to the page, not
/// just what came back.
pub struct ScriptedPageBridge {
    documents: Mutex<HashMap<String, Vec<ScriptedElement>>>,
    current: Mutex<String>,
    stats: Mutex<BridgeStats>,
    act_delay: Mutex<Duration>,
    find_failures: AtomicUsize,
    act_failures: AtomicUsize,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    next_handle: AtomicUsize,
}

impl Default for ScriptedPageBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPageBridge {
    pub fn new() -> Self {
        let mut documents = HashMap::new();
        documents.insert(String::new(), Vec::new());
        Self {
            documents: Mutex::new(documents),
            current: Mutex::new(String::new()),
            stats: Mutex::new(BridgeStats::default()),
            act_delay: Mutex::new(Duration::ZERO),
            find_failures: AtomicUsize::new(0),
            act_failures: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            next_handle: AtomicUsize::new(0),
        }
    }

    /// Replace the default document (the one active before any navigation).
    pub fn with_elements(self, elements: Vec<ScriptedElement>) -> Self {
        self.install(String::new(), elements);
        self
    }

    /// Register a document reachable through `navigate`.
    pub fn with_document(self, url: impl Into<String>, elements: Vec<ScriptedElement>) -> Self {
        self.install(url.into(), elements);
        self
    }

    /// Sleep this long inside every `act`, making overlap observable.
    pub fn with_act_delay(self, delay: Duration) -> Self {
        *self.act_delay.lock() = delay;
        self
    }

    /// Fail the next `n` `find_candidates` calls with a transport error.
    pub fn fail_finds(&self, n: usize) {
        self.find_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` `act` calls with a transport error.
    pub fn fail_acts(&self, n: usize) {
        self.act_failures.store(n, Ordering::SeqCst);
    }

    pub fn find_count(&self, kind: SelectorKind, value: &str) -> usize {
        self.stats
            .lock()
            .finds
            .get(&(kind, value.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_find_count(&self) -> usize {
        self.stats.lock().finds.values().sum()
    }

    pub fn nav_count(&self) -> usize {
        self.stats.lock().navigations
    }

    /// Every operation applied so far, as (handle id, op) pairs. Page-level
    /// operations are recorded under the id `"page"`.
    pub fn op_log(&self) -> Vec<(String, PageOp)> {
        self.stats.lock().ops.clone()
    }

    /// Maximum number of `act` calls that were in flight at once.
    pub fn act_high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    fn install(&self, url: String, mut elements: Vec<ScriptedElement>) {
        for element in elements.iter_mut() {
            if element.handle_id.is_empty() {
                let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
                element.handle_id = format!("el-{n}");
            }
        }
        self.documents.lock().insert(url, elements);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn with_element<T>(
        &self,
        handle_id: &str,
        f: impl FnOnce(&mut ScriptedElement) -> T,
    ) -> Result<T, BridgeError> {
        let current = self.current.lock().clone();
        let mut documents = self.documents.lock();
        let doc = documents
            .get_mut(&current)
            .ok_or_else(|| BridgeError::NoSuchElement(handle_id.to_string()))?;
        let element = doc
            .iter_mut()
            .find(|e| e.handle_id == handle_id)
            .ok_or_else(|| BridgeError::NoSuchElement(handle_id.to_string()))?;
        Ok(f(element))
    }

    fn apply_op(element: &mut ScriptedElement, op: &PageOp) -> Result<Value, BridgeError> {
        match op {
            PageOp::Click | PageOp::ScrollIntoView => Ok(Value::Null),
            PageOp::Fill { text } => {
                element.attributes.insert("value".into(), text.clone());
                Ok(Value::Null)
            }
            PageOp::SelectOption { value } => {
                if element.options.iter().any(|o| o == value) {
                    element.attributes.insert("selected".into(), value.clone());
                    Ok(Value::Null)
                } else {
                    Err(BridgeError::OpRejected {
                        op: op.name().to_string(),
                        reason: format!("no option {value:?}"),
                    })
                }
            }
            PageOp::SetChecked { checked } => {
                element
                    .attributes
                    .insert("checked".into(), checked.to_string());
                Ok(Value::Null)
            }
            PageOp::ReadText => Ok(Value::String(
                element.text.clone().unwrap_or_default().trim().to_string(),
            )),
            PageOp::ReadAttribute { name } => Ok(element
                .attr(name)
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null)),
            PageOp::ReadVisible => Ok(Value::Bool(element.visible)),
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageBridge for ScriptedPageBridge {
    async fn find_candidates(
        &self,
        _route: &PageRoute,
        kind: SelectorKind,
        value: &str,
    ) -> Result<Vec<ElementHandle>, BridgeError> {
        {
            let mut stats = self.stats.lock();
            *stats.finds.entry((kind, value.to_string())).or_insert(0) += 1;
        }
        if Self::take_failure(&self.find_failures) {
            return Err(BridgeError::Transport("scripted find failure".into()));
        }
        let current = self.current.lock().clone();
        let documents = self.documents.lock();
        let doc = documents.get(&current).map(Vec::as_slice).unwrap_or(&[]);
        let handles = doc
            .iter()
            .enumerate()
            .filter(|(_, e)| e.matches(kind, value))
            .map(|(dom_index, e)| ElementHandle {
                id: e.handle_id.clone(),
                tag: e.tag.clone(),
                text: e.text.clone(),
                dom_index,
            })
            .collect();
        Ok(handles)
    }

    async fn act(
        &self,
        _route: &PageRoute,
        target: Option<&ElementHandle>,
        op: PageOp,
    ) -> Result<Value, BridgeError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.high_water
            .fetch_max(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let delay = *self.act_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let handle_id = target.map(|t| t.id.as_str()).unwrap_or("page");
        debug!(target: "page_bridge", element = handle_id, op = op.name(), "scripted act");
        self.stats
            .lock()
            .ops
            .push((handle_id.to_string(), op.clone()));

        if Self::take_failure(&self.act_failures) {
            return Err(BridgeError::Transport("scripted act failure".into()));
        }
        match target {
            Some(handle) => self.with_element(&handle.id, |e| Self::apply_op(e, &op))?,
            // Page-level ops have nothing to mutate in a scripted document.
            None => Ok(Value::Null),
        }
    }

    async fn snapshot(
        &self,
        _route: &PageRoute,
        target: &ElementHandle,
    ) -> Result<ElementSnapshot, BridgeError> {
        self.with_element(&target.id, |e| ElementSnapshot {
            tag: e.tag.clone(),
            attributes: e.attributes.clone(),
            text: e.text.clone(),
            css_path: e.css_path.clone(),
            captured_at: chrono::Utc::now(),
        })
    }

    async fn navigate(&self, _route: &PageRoute, url: &str) -> Result<(), BridgeError> {
        debug!(target: "page_bridge", url, "scripted navigate");
        {
            let mut stats = self.stats.lock();
            stats.navigations += 1;
        }
        let mut documents = self.documents.lock();
        documents.entry(url.to_string()).or_default();
        *self.current.lock() = url.to_string();
        Ok(())
    }
}
