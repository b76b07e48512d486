//! Workflow bundle files.
//!
//! A bundle carries everything one dry run needs in a single document: the
//! workflow, the selectors its steps reference, and a scripted page to run
//! against. Bundles load from JSON or YAML depending on the file extension.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use webloom_action_engine::ActionKind;
use webloom_core_types::SelectorId;
use webloom_flow_engine::Workflow;
use webloom_page_bridge::ScriptedElement;
use webloom_selector_engine::Selector;

use crate::errors::BundleError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunBundle {
    pub workflow: Workflow,

    #[serde(default)]
    pub selectors: Vec<Selector>,

    /// The scripted document the dry run executes against.
    #[serde(default)]
    pub document: Vec<DocumentElement>,
}

/// One element of the scripted page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentElement {
    pub tag: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_path: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl DocumentElement {
    pub fn to_scripted(&self) -> ScriptedElement {
        let mut element = ScriptedElement::new(self.tag.as_str());
        for (name, value) in &self.attributes {
            element = element.with_attr(name.as_str(), value.as_str());
        }
        if let Some(text) = &self.text {
            element = element.with_text(text.as_str());
        }
        if let Some(path) = &self.css_path {
            element = element.with_css_path(path.as_str());
        }
        if !self.options.is_empty() {
            element = element.with_options(self.options.iter().map(String::as_str).collect());
        }
        if !self.visible {
            element = element.hidden();
        }
        element
    }
}

impl RunBundle {
    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let raw = fs::read_to_string(path)?;
        let bundle = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
            _ => serde_json::from_str(&raw)?,
        };
        Ok(bundle)
    }

    pub fn scripted_document(&self) -> Vec<ScriptedElement> {
        self.document.iter().map(DocumentElement::to_scripted).collect()
    }

    /// Every url the workflow navigates to, deduplicated in step order. The
    /// runner installs the scripted document under each of these so element
    /// steps keep working after a navigation.
    pub fn navigate_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for step in self.workflow.ordered_steps() {
            if step.action.kind != ActionKind::Navigate {
                continue;
            }
            if let Some(url) = step.action.param_str("url") {
                if seen.insert(url.to_string()) {
                    urls.push(url.to_string());
                }
            }
        }
        urls
    }

    /// Selector ids referenced by steps but missing from the bundle.
    pub fn dangling_selectors(&self) -> Vec<SelectorId> {
        let defined: HashSet<&SelectorId> = self.selectors.iter().map(|s| &s.id).collect();
        let mut seen = HashSet::new();
        let mut dangling = Vec::new();
        for step in &self.workflow.steps {
            if let Some(selector_id) = &step.action.selector {
                if !defined.contains(selector_id) && seen.insert(selector_id.clone()) {
                    dangling.push(selector_id.clone());
                }
            }
        }
        dangling
    }
}
