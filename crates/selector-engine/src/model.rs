//! Selector records with versioned variant history.
//!
//! A selector never forgets how an element used to be addressed: variants
//! are appended and deactivated, never removed. Each variant carries an
//! exponentially weighted success rate that drives fallback ordering and
//! the healing decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use webloom_core_types::{SelectorId, SelectorKind};
use webloom_page_bridge::ElementSnapshot;

/// One concrete way of addressing an element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectorVariant {
    pub kind: SelectorKind,
    pub value: String,
    pub created_at: DateTime<Utc>,
    /// EMA of resolution outcomes in `[0, 1]`.
    pub success_rate: f64,
    pub active: bool,
}

impl SelectorVariant {
    /// Fresh authored variant: optimistic rate, not yet active.
    pub fn new(kind: SelectorKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            created_at: Utc::now(),
            success_rate: 1.0,
            active: false,
        }
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate.clamp(0.0, 1.0);
        self
    }
}

/// A named, site-scoped element address with its full variant history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Selector {
    pub id: SelectorId,
    pub site: String,
    pub name: String,
    pub variants: Vec<SelectorVariant>,
    /// State of the element the last time a unique resolution succeeded.
    pub last_snapshot: Option<ElementSnapshot>,
}

impl Selector {
    pub fn new(id: SelectorId, site: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            site: site.into(),
            name: name.into(),
            variants: Vec::new(),
            last_snapshot: None,
        }
    }

    /// Append a variant, keeping the at-most-one-active invariant.
    pub fn with_variant(mut self, variant: SelectorVariant) -> Self {
        if variant.active {
            self.deactivate_all();
        }
        self.variants.push(variant);
        self
    }

    pub fn active_index(&self) -> Option<usize> {
        self.variants.iter().position(|v| v.active)
    }

    pub fn active_variant(&self) -> Option<&SelectorVariant> {
        self.active_index().map(|i| &self.variants[i])
    }

    /// Indices of fallback candidates: every non-active variant at or above
    /// the success-rate floor, most successful first.
    pub fn fallback_order(&self, floor: f64) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .variants
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.active && v.success_rate >= floor)
            .map(|(i, _)| i)
            .collect();
        order.sort_by(|a, b| {
            self.variants[*b]
                .success_rate
                .partial_cmp(&self.variants[*a].success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    /// Blend one resolution outcome into a variant's success rate:
    /// `new = alpha * outcome + (1 - alpha) * old`.
    pub fn record_outcome(&mut self, index: usize, success: bool, alpha: f64) {
        if let Some(variant) = self.variants.get_mut(index) {
            let outcome = if success { 1.0 } else { 0.0 };
            variant.success_rate =
                (alpha * outcome + (1.0 - alpha) * variant.success_rate).clamp(0.0, 1.0);
        }
    }

    /// Append a replacement variant and make it the single active one.
    /// Returns the new variant's index.
    pub fn append_active_variant(
        &mut self,
        kind: SelectorKind,
        value: impl Into<String>,
        seed_rate: f64,
    ) -> usize {
        self.deactivate_all();
        self.variants.push(SelectorVariant {
            kind,
            value: value.into(),
            created_at: Utc::now(),
            success_rate: seed_rate.clamp(0.0, 1.0),
            active: true,
        });
        self.variants.len() - 1
    }

    pub fn has_variant_value(&self, kind: SelectorKind, value: &str) -> bool {
        self.variants
            .iter()
            .any(|v| v.kind == kind && v.value == value)
    }

    fn deactivate_all(&mut self) {
        for variant in self.variants.iter_mut() {
            variant.active = false;
        }
    }
}

/// Shared registry of live selector records.
///
/// Each record sits behind its own async mutex: concurrent resolutions of
/// the same selector serialize, distinct selectors proceed independently.
#[derive(Default)]
pub struct SelectorVault {
    entries: DashMap<SelectorId, Arc<Mutex<Selector>>>,
}

impl SelectorVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, selector: Selector) {
        self.entries
            .insert(selector.id.clone(), Arc::new(Mutex::new(selector)));
    }

    pub fn get(&self, id: &SelectorId) -> Option<Arc<Mutex<Selector>>> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &SelectorId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone the current state of one record.
    pub async fn snapshot(&self, id: &SelectorId) -> Option<Selector> {
        match self.get(id) {
            Some(entry) => Some(entry.lock().await.clone()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector_with_rates(rates: &[(f64, bool)]) -> Selector {
        let mut selector = Selector::new(SelectorId::from("sel-1"), "shop.example", "submit");
        for (i, (rate, active)) in rates.iter().enumerate() {
            let mut variant =
                SelectorVariant::new(SelectorKind::Structural, format!("v{i}")).with_rate(*rate);
            variant.active = *active;
            selector.variants.push(variant);
        }
        selector
    }

    #[test]
    fn ema_moves_toward_outcome_and_stays_bounded() {
        let mut selector = selector_with_rates(&[(0.5, true)]);
        let alpha = 0.3;

        for _ in 0..20 {
            let before = selector.variants[0].success_rate;
            selector.record_outcome(0, true, alpha);
            let after = selector.variants[0].success_rate;
            assert!(after >= before, "success must never lower the rate");
            assert!(after <= 1.0);
        }
        assert!(selector.variants[0].success_rate > 0.99);

        for _ in 0..20 {
            selector.record_outcome(0, false, alpha);
        }
        assert!(selector.variants[0].success_rate < 0.01);
        assert!(selector.variants[0].success_rate >= 0.0);
    }

    #[test]
    fn single_failure_applies_exact_blend() {
        let mut selector = selector_with_rates(&[(1.0, true)]);
        selector.record_outcome(0, false, 0.3);
        assert!((selector.variants[0].success_rate - 0.7).abs() < 1e-9);
    }

    #[test]
    fn fallback_order_filters_floor_and_sorts_descending() {
        let selector = selector_with_rates(&[
            (0.4, true),  // active, excluded
            (0.2, false), // below floor
            (0.9, false),
            (0.6, false),
        ]);
        assert_eq!(selector.fallback_order(0.3), vec![2, 3]);
    }

    #[test]
    fn append_active_variant_keeps_single_active() {
        let mut selector = selector_with_rates(&[(0.8, true), (0.5, false)]);
        let idx = selector.append_active_variant(SelectorKind::Attribute, "data-testid=go", 0.5);
        assert_eq!(idx, 2);
        assert_eq!(selector.active_index(), Some(2));
        assert_eq!(selector.variants.iter().filter(|v| v.active).count(), 1);
        // History retained.
        assert_eq!(selector.variants.len(), 3);
        assert!((selector.variants[2].success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn with_variant_demotes_previous_active() {
        let selector = Selector::new(SelectorId::from("sel-2"), "shop.example", "cancel")
            .with_variant(SelectorVariant::new(SelectorKind::Identifier, "cancel").active())
            .with_variant(SelectorVariant::new(SelectorKind::Text, "Cancel").active());
        assert_eq!(selector.active_index(), Some(1));
    }

    #[tokio::test]
    async fn vault_serves_shared_entries() {
        let vault = SelectorVault::new();
        vault.insert(selector_with_rates(&[(1.0, true)]));
        let id = SelectorId::from("sel-1");
        assert!(vault.contains(&id));

        let entry = vault.get(&id).unwrap();
        entry.lock().await.record_outcome(0, false, 0.3);

        let snap = vault.snapshot(&id).await.unwrap();
        assert!((snap.variants[0].success_rate - 0.7).abs() < 1e-9);
        assert!(vault.get(&SelectorId::from("missing")).is_none());
    }
}
