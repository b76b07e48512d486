//! Engine configuration.
//!
//! Settings layer in a fixed order: built-in defaults, then an optional
//! configuration file, then `WEBLOOM_*` environment variables. Every knob
//! maps onto one tuning struct of the underlying engines.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use webloom_action_engine::RetryPolicy;
use webloom_selector_engine::{HealerTuning, ResolverTuning};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per step, the first try included.
    pub max_attempts: u32,

    /// Base retry delay in milliseconds; attempt `n` waits `n` times this.
    pub retry_base_delay_ms: u64,

    /// Result cache entry budget.
    pub cache_capacity: usize,

    /// Result cache time-to-live in milliseconds.
    pub cache_ttl_ms: u64,

    /// Concurrent steps allowed inside one parallel group.
    pub parallel_worker_limit: usize,

    /// Total time budget for resolving one selector, in milliseconds.
    pub resolve_timeout_ms: u64,

    /// Pause between resolution polls, in milliseconds.
    pub resolve_poll_ms: u64,

    /// Variants below this success rate are not tried during fallback.
    pub success_rate_floor: f64,

    /// Healing starts once the active variant drops below this rate.
    pub heal_threshold: f64,

    /// Smoothing factor for the success-rate moving average.
    pub ema_alpha: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            cache_capacity: 1_000,
            cache_ttl_ms: 300_000,
            parallel_worker_limit: 5,
            resolve_timeout_ms: 5_000,
            resolve_poll_ms: 100,
            success_rate_floor: 0.3,
            heal_threshold: 0.5,
            ema_alpha: 0.3,
        }
    }
}

impl EngineConfig {
    /// Load configuration with defaults, an optional file, and the
    /// environment applied in that order.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("max_attempts", 3i64)?
            .set_default("retry_base_delay_ms", 1_000i64)?
            .set_default("cache_capacity", 1_000i64)?
            .set_default("cache_ttl_ms", 300_000i64)?
            .set_default("parallel_worker_limit", 5i64)?
            .set_default("resolve_timeout_ms", 5_000i64)?
            .set_default("resolve_poll_ms", 100i64)?
            .set_default("success_rate_floor", 0.3)?
            .set_default("heal_threshold", 0.5)?
            .set_default("ema_alpha", 0.3)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix("WEBLOOM").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn resolver_tuning(&self) -> ResolverTuning {
        ResolverTuning {
            resolve_timeout: Duration::from_millis(self.resolve_timeout_ms),
            poll_interval: Duration::from_millis(self.resolve_poll_ms),
            success_rate_floor: self.success_rate_floor,
            ema_alpha: self.ema_alpha,
        }
    }

    pub fn healer_tuning(&self) -> HealerTuning {
        HealerTuning {
            heal_threshold: self.heal_threshold,
            ema_alpha: self.ema_alpha,
            ..HealerTuning::default()
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}
