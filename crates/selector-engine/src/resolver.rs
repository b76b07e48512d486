//! Selector resolver with EMA-ranked fallback orchestration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webloom_core_types::{PageRoute, SelectorId, SelectorKind};
use webloom_page_bridge::{ElementHandle, ElementSnapshot, PageBridge};

use crate::errors::SelectorError;
use crate::healer::{DefaultSelectorHealer, HealOutcome, HealerTuning, SelectorHealer};
use crate::model::{Selector, SelectorVault};
use crate::strategies::StrategySet;

/// How many matches a resolution must produce.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolveMode {
    /// Exactly one element.
    Unique,
    /// One or more elements.
    Many,
}

/// Successful resolution: which variant won and what it matched.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub selector_id: SelectorId,
    pub kind: SelectorKind,
    pub value: String,
    pub handles: Vec<ElementHandle>,
    /// True when the winning variant was created by self-healing during
    /// this resolution.
    pub healed: bool,
}

impl Resolution {
    pub fn primary(&self) -> Option<&ElementHandle> {
        self.handles.first()
    }
}

#[derive(Clone, Debug)]
pub struct ResolverTuning {
    /// Appear-wait deadline for the active variant.
    pub resolve_timeout: Duration,
    pub poll_interval: Duration,
    /// Variants below this success rate are not worth falling back to.
    pub success_rate_floor: f64,
    pub ema_alpha: f64,
}

impl Default for ResolverTuning {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            success_rate_floor: 0.3,
            ema_alpha: 0.3,
        }
    }
}

/// Element resolution port.
#[async_trait]
pub trait SelectorResolver: Send + Sync {
    /// Resolve a selector to live element handles, updating its variant
    /// rates and, after repeated failure, attempting one self-heal.
    async fn resolve(
        &self,
        route: &PageRoute,
        selector_id: &SelectorId,
        mode: ResolveMode,
    ) -> Result<Resolution, SelectorError>;

    /// Side-effect-free probe: how many elements does the preferred variant
    /// match right now? No rate moves, no waiting, no healing.
    async fn peek_count(
        &self,
        route: &PageRoute,
        selector_id: &SelectorId,
    ) -> Result<usize, SelectorError>;
}

enum MatchDecision {
    Accepted(Vec<ElementHandle>),
    Rejected { count: usize },
}

/// Default resolver over a vault of selector records.
pub struct DefaultSelectorResolver {
    bridge: Arc<dyn PageBridge>,
    vault: Arc<SelectorVault>,
    strategies: Arc<StrategySet>,
    healer: Arc<dyn SelectorHealer>,
    tuning: ResolverTuning,
}

impl DefaultSelectorResolver {
    pub fn new(
        bridge: Arc<dyn PageBridge>,
        vault: Arc<SelectorVault>,
        strategies: Arc<StrategySet>,
        healer: Arc<dyn SelectorHealer>,
        tuning: ResolverTuning,
    ) -> Self {
        Self {
            bridge,
            vault,
            strategies,
            healer,
            tuning,
        }
    }

    /// Resolver with the standard strategy set and default healer.
    pub fn standard(
        bridge: Arc<dyn PageBridge>,
        vault: Arc<SelectorVault>,
        tuning: ResolverTuning,
        healer_tuning: HealerTuning,
    ) -> Self {
        let strategies = Arc::new(StrategySet::standard(bridge.clone()));
        let healer = Arc::new(DefaultSelectorHealer::new(strategies.clone(), healer_tuning));
        Self::new(bridge, vault, strategies, healer, tuning)
    }

    async fn resolve_locked(
        &self,
        route: &PageRoute,
        selector: &mut Selector,
        mode: ResolveMode,
    ) -> Result<Resolution, SelectorError> {
        let alpha = self.tuning.ema_alpha;
        let mut tried = 0usize;
        let mut active_timed_out = false;

        // Phase 1: bounded appear-wait on the active variant.
        if let Some(active_idx) = selector.active_index() {
            let kind = selector.variants[active_idx].kind;
            let value = selector.variants[active_idx].value.clone();
            tried += 1;
            match self.appear_wait(route, kind, &value).await? {
                Some(handles) => match self.accept(selector, mode, handles) {
                    MatchDecision::Accepted(handles) => {
                        selector.record_outcome(active_idx, true, alpha);
                        self.refresh_snapshot(route, selector, mode, &handles).await;
                        return Ok(Resolution {
                            selector_id: selector.id.clone(),
                            kind,
                            value,
                            handles,
                            healed: false,
                        });
                    }
                    MatchDecision::Rejected { count } => {
                        // The best-known variant matches several elements and
                        // the snapshot cannot split them. Falling back here
                        // risks acting on the wrong element, so surface it.
                        selector.record_outcome(active_idx, false, alpha);
                        return Err(SelectorError::Ambiguous {
                            selector_id: selector.id.clone(),
                            count,
                        });
                    }
                },
                None => {
                    active_timed_out = true;
                    selector.record_outcome(active_idx, false, alpha);
                    debug!(
                        "active {} variant {:?} of selector {} did not appear",
                        kind.name(),
                        value,
                        selector.id
                    );
                }
            }
        }

        // Phase 2: fallback variants above the floor, best rate first.
        let order = selector.fallback_order(self.tuning.success_rate_floor);
        let had_fallbacks = !order.is_empty();
        for idx in order {
            let kind = selector.variants[idx].kind;
            let value = selector.variants[idx].value.clone();
            let Some(strategy) = self.strategies.get(kind) else {
                warn!("no strategy registered for {} variants", kind.name());
                continue;
            };
            let handles = match strategy.locate(route, &value).await {
                Ok(handles) => handles,
                Err(SelectorError::Bridge(err)) => return Err(SelectorError::Bridge(err)),
                Err(err) => {
                    // A malformed fallback value is skipped without touching
                    // its rate; it was never actually tried on the page.
                    warn!("fallback variant {:?} rejected: {}", value, err);
                    continue;
                }
            };
            tried += 1;
            if handles.is_empty() {
                selector.record_outcome(idx, false, alpha);
                continue;
            }
            match self.accept(selector, mode, handles) {
                MatchDecision::Accepted(handles) => {
                    selector.record_outcome(idx, true, alpha);
                    info!(
                        "selector {} fell back to {} variant {:?}",
                        selector.id,
                        kind.name(),
                        value
                    );
                    self.refresh_snapshot(route, selector, mode, &handles).await;
                    return Ok(Resolution {
                        selector_id: selector.id.clone(),
                        kind,
                        value,
                        handles,
                        healed: false,
                    });
                }
                MatchDecision::Rejected { count } => {
                    debug!(
                        "fallback variant {:?} matched {} elements, not usable",
                        value, count
                    );
                    selector.record_outcome(idx, false, alpha);
                }
            }
        }

        // Phase 3: one heal attempt per failed resolution.
        match self.healer.heal(route, selector).await? {
            HealOutcome::Healed {
                kind,
                value,
                handles,
            } => {
                self.refresh_snapshot(route, selector, mode, &handles).await;
                Ok(Resolution {
                    selector_id: selector.id.clone(),
                    kind,
                    value,
                    handles,
                    healed: true,
                })
            }
            outcome => {
                match outcome {
                    HealOutcome::Skipped { reason } => {
                        debug!("heal skipped for selector {}: {}", selector.id, reason)
                    }
                    HealOutcome::Exhausted { tried } => {
                        warn!(
                            "heal exhausted for selector {} after {} candidates",
                            selector.id, tried
                        )
                    }
                    HealOutcome::Healed { .. } => unreachable!(),
                }
                if active_timed_out && !had_fallbacks {
                    Err(SelectorError::Timeout {
                        selector_id: selector.id.clone(),
                        waited_ms: self.tuning.resolve_timeout.as_millis() as u64,
                    })
                } else {
                    Err(SelectorError::NotFound {
                        selector_id: selector.id.clone(),
                        tried,
                    })
                }
            }
        }
    }

    /// Poll the active variant until it matches or the deadline passes.
    async fn appear_wait(
        &self,
        route: &PageRoute,
        kind: SelectorKind,
        value: &str,
    ) -> Result<Option<Vec<ElementHandle>>, SelectorError> {
        let strategy = self
            .strategies
            .get(kind)
            .ok_or_else(|| SelectorError::InvalidValue {
                kind,
                value: value.to_string(),
                reason: "no strategy registered for this family".to_string(),
            })?;
        let started = Instant::now();
        loop {
            let handles = strategy.locate(route, value).await?;
            if !handles.is_empty() {
                return Ok(Some(handles));
            }
            if started.elapsed() + self.tuning.poll_interval > self.tuning.resolve_timeout {
                return Ok(None);
            }
            tokio::time::sleep(self.tuning.poll_interval).await;
        }
    }

    /// Apply the mode's uniqueness rule, using the stored snapshot to split
    /// multi-matches when possible.
    fn accept(
        &self,
        selector: &Selector,
        mode: ResolveMode,
        handles: Vec<ElementHandle>,
    ) -> MatchDecision {
        match mode {
            ResolveMode::Many => MatchDecision::Accepted(handles),
            ResolveMode::Unique => {
                if handles.len() == 1 {
                    return MatchDecision::Accepted(handles);
                }
                if let Some(snapshot) = selector.last_snapshot.as_ref() {
                    if let Some(winner) = disambiguate(snapshot, &handles) {
                        debug!(
                            "snapshot disambiguated {} candidates for selector {}",
                            handles.len(),
                            selector.id
                        );
                        return MatchDecision::Accepted(vec![winner]);
                    }
                }
                MatchDecision::Rejected {
                    count: handles.len(),
                }
            }
        }
    }

    /// Keep the stored snapshot current after a successful unique match.
    async fn refresh_snapshot(
        &self,
        route: &PageRoute,
        selector: &mut Selector,
        mode: ResolveMode,
        handles: &[ElementHandle],
    ) {
        if mode != ResolveMode::Unique || handles.len() != 1 {
            return;
        }
        match self.bridge.snapshot(route, &handles[0]).await {
            Ok(snapshot) => selector.last_snapshot = Some(snapshot),
            Err(err) => debug!(
                "snapshot refresh failed for selector {}: {}",
                selector.id, err
            ),
        }
    }
}

#[async_trait]
impl SelectorResolver for DefaultSelectorResolver {
    async fn resolve(
        &self,
        route: &PageRoute,
        selector_id: &SelectorId,
        mode: ResolveMode,
    ) -> Result<Resolution, SelectorError> {
        let entry = self
            .vault
            .get(selector_id)
            .ok_or_else(|| SelectorError::Unknown(selector_id.clone()))?;
        // Concurrent resolutions of the same selector serialize here.
        let mut selector = entry.lock().await;
        self.resolve_locked(route, &mut selector, mode).await
    }

    async fn peek_count(
        &self,
        route: &PageRoute,
        selector_id: &SelectorId,
    ) -> Result<usize, SelectorError> {
        let entry = self
            .vault
            .get(selector_id)
            .ok_or_else(|| SelectorError::Unknown(selector_id.clone()))?;
        let (kind, value) = {
            let selector = entry.lock().await;
            let variant = selector
                .active_variant()
                .or_else(|| selector.variants.first())
                .ok_or_else(|| SelectorError::NotFound {
                    selector_id: selector.id.clone(),
                    tried: 0,
                })?;
            (variant.kind, variant.value.clone())
        };
        let strategy = self
            .strategies
            .get(kind)
            .ok_or_else(|| SelectorError::InvalidValue {
                kind,
                value: value.clone(),
                reason: "no strategy registered for this family".to_string(),
            })?;
        let handles = strategy.locate(route, &value).await?;
        Ok(handles.len())
    }
}

fn snapshot_score(snapshot: &ElementSnapshot, handle: &ElementHandle) -> u32 {
    let mut score = 0;
    if handle.tag == snapshot.tag {
        score += 1;
    }
    if let (Some(handle_text), Some(snap_text)) = (
        handle.text.as_deref().map(str::trim),
        snapshot.trimmed_text(),
    ) {
        if handle_text == snap_text {
            score += 2;
        } else if handle_text.contains(snap_text) {
            score += 1;
        }
    }
    score
}

/// Pick the single candidate the snapshot describes best. `None` on a tie
/// or when nothing resembles the snapshot at all.
fn disambiguate(snapshot: &ElementSnapshot, handles: &[ElementHandle]) -> Option<ElementHandle> {
    let mut best: Option<(u32, &ElementHandle)> = None;
    let mut tied = false;
    for handle in handles {
        let score = snapshot_score(snapshot, handle);
        match best {
            Some((top, _)) if score == top => tied = true,
            Some((top, _)) if score > top => {
                best = Some((score, handle));
                tied = false;
            }
            None => best = Some((score, handle)),
            _ => {}
        }
    }
    match best {
        Some((score, handle)) if score > 0 && !tied => Some(handle.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use chrono::Utc;
    use webloom_core_types::{PageId, SessionId};
    use webloom_page_bridge::{ScriptedElement, ScriptedPageBridge};

    use crate::model::SelectorVariant;

    fn route() -> PageRoute {
        PageRoute::new(SessionId::from("s"), PageId::from("p"))
    }

    fn fast_tuning() -> ResolverTuning {
        ResolverTuning {
            resolve_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            ..ResolverTuning::default()
        }
    }

    fn resolver_over(
        bridge: Arc<ScriptedPageBridge>,
        vault: Arc<SelectorVault>,
    ) -> DefaultSelectorResolver {
        DefaultSelectorResolver::standard(bridge, vault, fast_tuning(), HealerTuning::default())
    }

    fn submit_page() -> Arc<ScriptedPageBridge> {
        Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("button")
                .with_attr("id", "submit")
                .with_attr("data-testid", "submit-btn")
                .with_text("Submit order"),
            ScriptedElement::new("button")
                .with_css_path("div.footer > button")
                .with_text("Cancel"),
        ]))
    }

    fn seed(vault: &SelectorVault, variants: Vec<SelectorVariant>) -> SelectorId {
        let id = SelectorId::from("sel-1");
        let mut selector = Selector::new(id.clone(), "shop.example", "submit");
        for variant in variants {
            selector = selector.with_variant(variant);
        }
        vault.insert(selector);
        id
    }

    #[tokio::test]
    async fn resolves_active_variant_and_credits_it() {
        let bridge = submit_page();
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![SelectorVariant::new(SelectorKind::Identifier, "submit")
                .with_rate(0.5)
                .active()],
        );
        let resolver = resolver_over(bridge.clone(), vault.clone());

        let resolution = resolver
            .resolve(&route(), &id, ResolveMode::Unique)
            .await
            .unwrap();
        assert_eq!(resolution.handles.len(), 1);
        assert_eq!(resolution.kind, SelectorKind::Identifier);
        assert!(!resolution.healed);

        let stored = vault.snapshot(&id).await.unwrap();
        // 0.3 * 1 + 0.7 * 0.5
        assert!((stored.variants[0].success_rate - 0.65).abs() < 1e-9);
        assert!(stored.last_snapshot.is_some(), "snapshot refreshed");
    }

    #[tokio::test]
    async fn falls_back_by_descending_success_rate() {
        let bridge = submit_page();
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![
                SelectorVariant::new(SelectorKind::Identifier, "gone")
                    .with_rate(0.9)
                    .active(),
                SelectorVariant::new(SelectorKind::Text, "Submit order").with_rate(0.4),
                SelectorVariant::new(SelectorKind::Attribute, "data-testid=submit-btn")
                    .with_rate(0.8),
            ],
        );
        let resolver = resolver_over(bridge.clone(), vault.clone());

        let resolution = resolver
            .resolve(&route(), &id, ResolveMode::Unique)
            .await
            .unwrap();
        // The higher-rated attribute variant wins before text is tried.
        assert_eq!(resolution.kind, SelectorKind::Attribute);
        assert_eq!(bridge.find_count(SelectorKind::Text, "Submit order"), 0);

        let stored = vault.snapshot(&id).await.unwrap();
        assert!((stored.variants[0].success_rate - 0.63).abs() < 1e-9, "active lost");
        assert!((stored.variants[2].success_rate - 0.86).abs() < 1e-9, "winner credited");
        assert!((stored.variants[1].success_rate - 0.4).abs() < 1e-9, "untried unchanged");
    }

    #[tokio::test]
    async fn appear_wait_resolves_elements_that_arrive_late() {
        let bridge = Arc::new(ScriptedPageBridge::new().with_document(
            "late",
            vec![ScriptedElement::new("button").with_attr("id", "submit")],
        ));
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![SelectorVariant::new(SelectorKind::Identifier, "submit").active()],
        );
        let resolver = DefaultSelectorResolver::standard(
            bridge.clone(),
            vault,
            ResolverTuning {
                resolve_timeout: Duration::from_millis(500),
                poll_interval: Duration::from_millis(10),
                ..ResolverTuning::default()
            },
            HealerTuning::default(),
        );

        let r = route();
        let (resolution, _) = tokio::join!(resolver.resolve(&r, &id, ResolveMode::Unique), async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            bridge.navigate(&r, "late").await.unwrap();
        });
        assert_eq!(resolution.unwrap().handles.len(), 1);
        assert!(bridge.find_count(SelectorKind::Identifier, "submit") > 1, "polled");
    }

    #[tokio::test]
    async fn ambiguous_unique_match_without_snapshot_is_fatal() {
        let bridge = submit_page();
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![SelectorVariant::new(SelectorKind::Structural, "button")
                .with_rate(0.9)
                .active()],
        );
        let resolver = resolver_over(bridge, vault.clone());

        let err = resolver
            .resolve(&route(), &id, ResolveMode::Unique)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectorError::Ambiguous { count: 2, .. }));
        assert!(!err.is_retryable());

        let stored = vault.snapshot(&id).await.unwrap();
        assert!((stored.variants[0].success_rate - 0.63).abs() < 1e-9);
    }

    #[tokio::test]
    async fn snapshot_disambiguates_multi_match() {
        let bridge = submit_page();
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![SelectorVariant::new(SelectorKind::Structural, "button")
                .with_rate(0.9)
                .active()],
        );
        {
            let entry = vault.get(&id).unwrap();
            entry.lock().await.last_snapshot = Some(ElementSnapshot {
                tag: "button".into(),
                attributes: BTreeMap::new(),
                text: Some("Submit order".into()),
                css_path: None,
                captured_at: Utc::now(),
            });
        }
        let resolver = resolver_over(bridge, vault);

        let resolution = resolver
            .resolve(&route(), &id, ResolveMode::Unique)
            .await
            .unwrap();
        assert_eq!(resolution.handles.len(), 1);
        assert_eq!(resolution.handles[0].text.as_deref(), Some("Submit order"));
    }

    #[tokio::test]
    async fn many_mode_accepts_every_match() {
        let bridge = submit_page();
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![SelectorVariant::new(SelectorKind::Structural, "button").active()],
        );
        let resolver = resolver_over(bridge, vault);

        let resolution = resolver
            .resolve(&route(), &id, ResolveMode::Many)
            .await
            .unwrap();
        assert_eq!(resolution.handles.len(), 2);
    }

    #[tokio::test]
    async fn failed_resolution_heals_from_snapshot() {
        // Old id is gone; the testid survives on the page.
        let bridge = Arc::new(ScriptedPageBridge::new().with_elements(vec![
            ScriptedElement::new("button")
                .with_attr("data-testid", "submit-btn")
                .with_text("Submit order"),
        ]));
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![SelectorVariant::new(SelectorKind::Identifier, "old-submit")
                .with_rate(0.3)
                .active()],
        );
        {
            let entry = vault.get(&id).unwrap();
            entry.lock().await.last_snapshot = Some(ElementSnapshot {
                tag: "button".into(),
                attributes: [
                    ("id".to_string(), "old-submit".to_string()),
                    ("data-testid".to_string(), "submit-btn".to_string()),
                ]
                .into_iter()
                .collect(),
                text: Some("Submit order".into()),
                css_path: None,
                captured_at: Utc::now(),
            });
        }
        let resolver = resolver_over(bridge, vault.clone());

        let resolution = resolver
            .resolve(&route(), &id, ResolveMode::Unique)
            .await
            .unwrap();
        assert!(resolution.healed);
        assert_eq!(resolution.kind, SelectorKind::Attribute);
        assert_eq!(resolution.value, "data-testid=submit-btn");

        let stored = vault.snapshot(&id).await.unwrap();
        assert_eq!(stored.variants.len(), 2);
        assert_eq!(stored.active_index(), Some(1));
        assert!(!stored.variants[0].active, "old variant retained, demoted");
    }

    #[tokio::test]
    async fn times_out_when_nothing_matches_and_heal_declines() {
        let bridge = Arc::new(ScriptedPageBridge::new());
        let vault = Arc::new(SelectorVault::new());
        // Healthy rate: one failure keeps it above the heal threshold.
        let id = seed(
            &vault,
            vec![SelectorVariant::new(SelectorKind::Identifier, "submit")
                .with_rate(0.9)
                .active()],
        );
        let resolver = resolver_over(bridge, vault.clone());

        let err = resolver
            .resolve(&route(), &id, ResolveMode::Unique)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectorError::Timeout { .. }));
        assert!(err.is_retryable());

        let stored = vault.snapshot(&id).await.unwrap();
        assert_eq!(stored.variants.len(), 1, "no heal without snapshot");
    }

    #[tokio::test]
    async fn not_found_after_exhausting_fallbacks() {
        let bridge = Arc::new(ScriptedPageBridge::new());
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![
                SelectorVariant::new(SelectorKind::Identifier, "gone")
                    .with_rate(0.9)
                    .active(),
                SelectorVariant::new(SelectorKind::Text, "Nope").with_rate(0.5),
            ],
        );
        let resolver = resolver_over(bridge, vault);

        let err = resolver
            .resolve(&route(), &id, ResolveMode::Unique)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectorError::NotFound { tried: 2, .. }));
    }

    #[tokio::test]
    async fn peek_count_never_moves_rates() {
        let bridge = submit_page();
        let vault = Arc::new(SelectorVault::new());
        let id = seed(
            &vault,
            vec![SelectorVariant::new(SelectorKind::Identifier, "missing")
                .with_rate(0.8)
                .active()],
        );
        let resolver = resolver_over(bridge, vault.clone());

        assert_eq!(resolver.peek_count(&route(), &id).await.unwrap(), 0);
        let stored = vault.snapshot(&id).await.unwrap();
        assert!((stored.variants[0].success_rate - 0.8).abs() < 1e-9);
        assert_eq!(stored.variants.len(), 1);
    }

    #[tokio::test]
    async fn unknown_selector_is_reported() {
        let bridge = submit_page();
        let vault = Arc::new(SelectorVault::new());
        let resolver = resolver_over(bridge, vault);

        let err = resolver
            .resolve(&route(), &SelectorId::from("nope"), ResolveMode::Unique)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectorError::Unknown(_)));
    }
}
