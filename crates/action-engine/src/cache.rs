//! Result cache for idempotent extraction actions.
//!
//! Keys are content fingerprints over the action kind, selector reference,
//! and canonicalized parameters, so two actions that would read the same
//! thing share an entry no matter how their params maps were built. Entries
//! expire after a TTL and the whole cache is bounded by LRU eviction. Stale
//! entries are dropped on read, never served.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::types::Action;

/// Stable fingerprint for an action's cacheable identity.
pub fn action_fingerprint(action: &Action) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(action.kind.name().as_bytes());
    hasher.update(b"|");
    if let Some(selector) = &action.selector {
        hasher.update(selector.0.as_bytes());
    }
    hasher.update(b"|");
    let mut keys: Vec<&String> = action.params.keys().collect();
    keys.sort();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        if let Some(value) = action.params.get(key) {
            hasher.update(canonical_value(value).as_bytes());
        }
        hasher.update(b"|");
    }
    format!("act_{}", hasher.finalize().to_hex())
}

/// Render a JSON value with object keys sorted at every level, so map
/// insertion order never shows up in the fingerprint.
fn canonical_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .iter()
                .filter_map(|key| {
                    map.get(*key)
                        .map(|inner| format!("{}:{}", key, canonical_value(inner)))
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_value).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

struct CacheSlot {
    value: Value,
    stored_at: Instant,
}

/// Bounded TTL + LRU cache keyed by action fingerprint.
pub struct ResultCache {
    entries: Mutex<LruCache<String, CacheSlot>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Fetch a fresh entry, bumping its recency. A stale hit is removed and
    /// reported as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        let mut entries = self.entries.lock();
        let hit = entries.get(key).map(|slot| {
            if now.duration_since(slot.stored_at) < self.ttl {
                Some(slot.value.clone())
            } else {
                None
            }
        })?;
        match hit {
            Some(value) => Some(value),
            None => {
                trace!(key, "dropping stale cache entry");
                entries.pop(key);
                None
            }
        }
    }

    pub fn put(&self, key: String, value: Value) {
        let mut entries = self.entries.lock();
        entries.put(
            key,
            CacheSlot {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionKind;
    use serde_json::json;
    use webloom_core_types::SelectorId;

    fn extract_action(selector: &str) -> Action {
        Action::new("read", ActionKind::ExtractText).with_selector(SelectorId::from(selector))
    }

    #[test]
    fn fingerprint_ignores_param_insertion_order() {
        let mut a = Action::new("read", ActionKind::ExtractAttribute)
            .with_selector(SelectorId::from("sel-1"));
        a.params.insert("attribute".into(), json!("href"));
        a.params.insert("extra".into(), json!({"b": 2, "a": 1}));

        let mut b = Action::new("read", ActionKind::ExtractAttribute)
            .with_selector(SelectorId::from("sel-1"));
        b.params.insert("extra".into(), json!({"a": 1, "b": 2}));
        b.params.insert("attribute".into(), json!("href"));

        assert_eq!(action_fingerprint(&a), action_fingerprint(&b));
    }

    #[test]
    fn fingerprint_separates_kind_selector_and_params() {
        let base = extract_action("sel-1");
        let other_selector = extract_action("sel-2");
        assert_ne!(action_fingerprint(&base), action_fingerprint(&other_selector));

        let other_kind = Action::new("read", ActionKind::ExtractMany)
            .with_selector(SelectorId::from("sel-1"));
        assert_ne!(action_fingerprint(&base), action_fingerprint(&other_kind));

        let with_param = extract_action("sel-1").with_param("attribute", "href");
        assert_ne!(action_fingerprint(&base), action_fingerprint(&with_param));
    }

    #[test]
    fn entries_are_fresh_strictly_inside_the_ttl() {
        let cache = ResultCache::new(8, Duration::from_millis(100));
        cache.put("k".into(), json!("v"));
        let stored = Instant::now();

        assert_eq!(cache.get_at("k", stored), Some(json!("v")));
        assert_eq!(
            cache.get_at("k", stored + Duration::from_millis(50)),
            Some(json!("v"))
        );
        // Past the TTL the entry is stale and gets dropped on read.
        assert_eq!(cache.get_at("k", stored + Duration::from_millis(150)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_eviction_prefers_recently_read_entries() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), json!(1));
        cache.put("b".into(), json!(2));

        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a"), Some(json!(1)));
        cache.put("c".into(), json!(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(json!(3)));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let cache = ResultCache::new(0, Duration::from_secs(60));
        cache.put("only".into(), json!(true));
        assert_eq!(cache.len(), 1);
        cache.put("next".into(), json!(false));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("only"), None);
    }
}
