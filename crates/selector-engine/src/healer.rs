//! Self-healing: derive a replacement variant from the last known snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use webloom_core_types::{PageRoute, SelectorKind};
use webloom_page_bridge::ElementHandle;

use crate::errors::SelectorError;
use crate::model::Selector;
use crate::strategies::StrategySet;

/// Result of one heal attempt.
#[derive(Clone, Debug)]
pub enum HealOutcome {
    /// A replacement variant was appended and is now active.
    Healed {
        kind: SelectorKind,
        value: String,
        handles: Vec<ElementHandle>,
    },
    /// Preconditions not met; nothing was changed.
    Skipped { reason: String },
    /// Every generated candidate failed validation.
    Exhausted { tried: usize },
}

impl HealOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, HealOutcome::Healed { .. })
    }
}

#[derive(Clone, Debug)]
pub struct HealerTuning {
    /// Heal only when the active variant's rate has sunk below this.
    pub heal_threshold: f64,
    /// Neutral rate seeded into a freshly healed variant.
    pub seed_rate: f64,
    pub ema_alpha: f64,
}

impl Default for HealerTuning {
    fn default() -> Self {
        Self {
            heal_threshold: 0.5,
            seed_rate: 0.5,
            ema_alpha: 0.3,
        }
    }
}

/// Self-healer port. Invoked by the resolver at most once per failed
/// resolution, under the selector's lock.
#[async_trait]
pub trait SelectorHealer: Send + Sync {
    async fn heal(
        &self,
        route: &PageRoute,
        selector: &mut Selector,
    ) -> Result<HealOutcome, SelectorError>;
}

/// Default healer: walks the strategies in generate-priority order and
/// appends the first candidate value that resolves to exactly one element.
pub struct DefaultSelectorHealer {
    strategies: Arc<StrategySet>,
    tuning: HealerTuning,
}

impl DefaultSelectorHealer {
    pub fn new(strategies: Arc<StrategySet>, tuning: HealerTuning) -> Self {
        Self { strategies, tuning }
    }
}

#[async_trait]
impl SelectorHealer for DefaultSelectorHealer {
    async fn heal(
        &self,
        route: &PageRoute,
        selector: &mut Selector,
    ) -> Result<HealOutcome, SelectorError> {
        let Some(snapshot) = selector.last_snapshot.clone() else {
            return Ok(HealOutcome::Skipped {
                reason: "no snapshot on record".to_string(),
            });
        };
        if let Some(active) = selector.active_variant() {
            if active.success_rate >= self.tuning.heal_threshold {
                return Ok(HealOutcome::Skipped {
                    reason: format!(
                        "active rate {:.2} still at or above heal threshold {:.2}",
                        active.success_rate, self.tuning.heal_threshold
                    ),
                });
            }
        }

        info!("attempting self-heal for selector {}", selector.id);
        let mut tried = 0;
        for strategy in self.strategies.iter() {
            let Some(value) = strategy.generate(&snapshot) else {
                continue;
            };
            // Re-proposing a value already in the history cannot help.
            if selector.has_variant_value(strategy.kind(), &value) {
                debug!(
                    "skipping {} candidate {:?}: already in history",
                    strategy.name(),
                    value
                );
                continue;
            }
            tried += 1;
            let handles = match strategy.locate(route, &value).await {
                Ok(handles) => handles,
                Err(err) => {
                    debug!("{} candidate {:?} failed: {}", strategy.name(), value, err);
                    continue;
                }
            };
            if handles.len() != 1 {
                debug!(
                    "{} candidate {:?} matched {} elements, need exactly one",
                    strategy.name(),
                    value,
                    handles.len()
                );
                continue;
            }

            let kind = strategy.kind();
            let idx = selector.append_active_variant(kind, value.clone(), self.tuning.seed_rate);
            // The successful validation counts as the variant's first outcome.
            selector.record_outcome(idx, true, self.tuning.ema_alpha);
            info!(
                "healed selector {} with {} variant {:?}",
                selector.id,
                kind.name(),
                value
            );
            return Ok(HealOutcome::Healed {
                kind,
                value,
                handles,
            });
        }

        debug!(
            "heal exhausted for selector {} after {} candidates",
            selector.id, tried
        );
        Ok(HealOutcome::Exhausted { tried })
    }
}
