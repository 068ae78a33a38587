//! Namespaced response cache.
//!
//! Entries carry a TTL, optional tags for group invalidation, and access
//! stats. Expiry is lazy on read plus a periodic sweep; each namespace
//! evicts least-recently-used entries past its capacity.

use cmms_shared::CacheConfig;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Namespace for assembled query responses, keyed by normalized query hash.
pub const RESPONSES_NAMESPACE: &str = "query_results";

/// TTL/tag rules applied to response entries by query text. Questions about
/// live state go stale quickly; historical lookups can sit longer. First
/// matching rule wins.
const POLICY_RULES: &[(&[&str], u64, &str)] = &[
    (&["status", "状態", "稼働", "運転"], 60, "status"),
    (
        &[
            "reading",
            "trend",
            "temperature",
            "pressure",
            "vibration",
            "温度",
            "圧力",
            "振動",
            "トレンド",
        ],
        60,
        "process",
    ),
    (&["history", "repair", "履歴", "修理"], 1800, "history"),
    (&["risk", "assessment", "リスク", "評価"], 1800, "risk"),
    (&["schedule", "planned", "予定", "計画"], 600, "schedule"),
];

/// TTL and tags chosen for one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

struct CacheEntry {
    data: serde_json::Value,
    stored_at: Instant,
    access_seq: u64,
    hit_count: u64,
    ttl: Duration,
    tags: Vec<String>,
}

impl CacheEntry {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

#[derive(Default)]
struct Namespace {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl Namespace {
    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_seq)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions += 1;
        }
    }
}

/// Per-namespace counters, served by the admin cache endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheNamespaceStats {
    pub namespace: String,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
}

pub struct QueryCache {
    config: CacheConfig,
    namespaces: Mutex<HashMap<String, Namespace>>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    /// Pattern-derived TTL and tags for a response entry. Unmatched queries
    /// get the configured default TTL and no extra tags.
    pub fn policy_for(query: &str) -> CachePolicy {
        let lower = query.to_lowercase();
        for (needles, ttl_seconds, tag) in POLICY_RULES {
            if needles.iter().any(|needle| lower.contains(needle)) {
                return CachePolicy {
                    ttl: Some(Duration::from_secs(*ttl_seconds)),
                    tags: vec![(*tag).to_string()],
                };
            }
        }
        CachePolicy {
            ttl: None,
            tags: Vec::new(),
        }
    }

    /// Stable key for a query string: case, surrounding whitespace, and
    /// internal runs of whitespace do not change it.
    pub fn key_for(query: &str) -> String {
        let normalized = query
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let mut hasher = DefaultHasher::new();
        normalized.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<serde_json::Value> {
        let mut namespaces = self.namespaces.lock().unwrap();
        let ns = namespaces.entry(namespace.to_string()).or_default();
        let now = Instant::now();

        let expired = match ns.entries.get(key) {
            Some(entry) => entry.expired(now),
            None => {
                ns.misses += 1;
                return None;
            }
        };
        if expired {
            ns.entries.remove(key);
            ns.expirations += 1;
            ns.misses += 1;
            return None;
        }

        ns.next_seq += 1;
        let seq = ns.next_seq;
        let entry = ns.entries.get_mut(key).unwrap();
        entry.access_seq = seq;
        entry.hit_count += 1;
        ns.hits += 1;
        Some(entry.data.clone())
    }

    /// Store a value. `ttl: None` uses the configured default.
    pub fn put(
        &self,
        namespace: &str,
        key: &str,
        data: serde_json::Value,
        ttl: Option<Duration>,
        tags: Vec<String>,
    ) {
        let mut namespaces = self.namespaces.lock().unwrap();
        let ns = namespaces.entry(namespace.to_string()).or_default();

        while ns.entries.len() >= self.config.max_entries_per_namespace
            && !ns.entries.contains_key(key)
        {
            ns.evict_lru();
        }

        ns.next_seq += 1;
        ns.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
                access_seq: ns.next_seq,
                hit_count: 0,
                ttl: ttl.unwrap_or_else(|| self.config.default_ttl()),
                tags,
            },
        );
    }

    /// Drop every entry carrying `tag`, in all namespaces.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let mut namespaces = self.namespaces.lock().unwrap();
        let mut removed = 0;
        for ns in namespaces.values_mut() {
            let before = ns.entries.len();
            ns.entries.retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
            removed += before - ns.entries.len();
        }
        if removed > 0 {
            debug!(tag, removed, "cache entries invalidated by tag");
        }
        removed
    }

    /// Drop a whole namespace.
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        let mut namespaces = self.namespaces.lock().unwrap();
        match namespaces.get_mut(namespace) {
            Some(ns) => {
                let removed = ns.entries.len();
                ns.entries.clear();
                removed
            }
            None => 0,
        }
    }

    /// Remove expired entries everywhere. Driven by the background sweep.
    pub fn sweep(&self) -> usize {
        let mut namespaces = self.namespaces.lock().unwrap();
        let now = Instant::now();
        let mut removed = 0;
        for ns in namespaces.values_mut() {
            let before = ns.entries.len();
            ns.entries.retain(|_, entry| !entry.expired(now));
            let swept = before - ns.entries.len();
            ns.expirations += swept as u64;
            removed += swept;
        }
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
        removed
    }

    pub fn stats(&self) -> Vec<CacheNamespaceStats> {
        let namespaces = self.namespaces.lock().unwrap();
        let mut all: Vec<CacheNamespaceStats> = namespaces
            .iter()
            .map(|(name, ns)| {
                let lookups = ns.hits + ns.misses;
                CacheNamespaceStats {
                    namespace: name.clone(),
                    entries: ns.entries.len(),
                    hits: ns.hits,
                    misses: ns.misses,
                    hit_rate: if lookups == 0 {
                        0.0
                    } else {
                        ns.hits as f64 / lookups as f64
                    },
                    evictions: ns.evictions,
                    expirations: ns.expirations,
                }
            })
            .collect();
        all.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small_cache(max_entries: usize) -> QueryCache {
        QueryCache::new(CacheConfig {
            default_ttl_seconds: 300,
            max_entries_per_namespace: max_entries,
            sweep_interval_seconds: 60,
            master_data_ttl_seconds: 900,
        })
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = small_cache(10);
        cache.put("responses", "k1", json!({"rows": 3}), None, vec![]);
        assert_eq!(cache.get("responses", "k1"), Some(json!({"rows": 3})));
        assert_eq!(cache.get("responses", "absent"), None);

        let stats = cache.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].hits, 1);
        assert_eq!(stats[0].misses, 1);
        assert!((stats[0].hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_key_normalization() {
        let a = QueryCache::key_for("  Status of HX-101 ");
        let b = QueryCache::key_for("status   of hx-101");
        let c = QueryCache::key_for("status of p-102");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = small_cache(10);
        cache.put(
            "responses",
            "k1",
            json!(1),
            Some(Duration::ZERO),
            vec![],
        );
        assert_eq!(cache.get("responses", "k1"), None);
        let stats = cache.stats();
        assert_eq!(stats[0].expirations, 1);
        assert_eq!(stats[0].misses, 1);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = small_cache(2);
        cache.put("responses", "a", json!("a"), None, vec![]);
        cache.put("responses", "b", json!("b"), None, vec![]);
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("responses", "a");
        cache.put("responses", "c", json!("c"), None, vec![]);

        assert!(cache.get("responses", "a").is_some());
        assert!(cache.get("responses", "b").is_none());
        assert!(cache.get("responses", "c").is_some());
        assert_eq!(cache.stats()[0].evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = small_cache(2);
        cache.put("responses", "a", json!(1), None, vec![]);
        cache.put("responses", "b", json!(2), None, vec![]);
        cache.put("responses", "a", json!(3), None, vec![]);
        assert_eq!(cache.get("responses", "a"), Some(json!(3)));
        assert_eq!(cache.get("responses", "b"), Some(json!(2)));
        assert_eq!(cache.stats()[0].evictions, 0);
    }

    #[test]
    fn test_tag_invalidation_spans_namespaces() {
        let cache = small_cache(10);
        cache.put(
            "responses",
            "k1",
            json!(1),
            None,
            vec!["equipment".to_string()],
        );
        cache.put(
            "sql",
            "k2",
            json!(2),
            None,
            vec!["equipment".to_string(), "llm".to_string()],
        );
        cache.put("sql", "k3", json!(3), None, vec!["llm".to_string()]);

        assert_eq!(cache.invalidate_tag("equipment"), 2);
        assert_eq!(cache.get("responses", "k1"), None);
        assert_eq!(cache.get("sql", "k2"), None);
        assert_eq!(cache.get("sql", "k3"), Some(json!(3)));
    }

    #[test]
    fn test_namespace_invalidation() {
        let cache = small_cache(10);
        cache.put("responses", "k1", json!(1), None, vec![]);
        cache.put("responses", "k2", json!(2), None, vec![]);
        cache.put("sql", "k3", json!(3), None, vec![]);

        assert_eq!(cache.invalidate_namespace("responses"), 2);
        assert_eq!(cache.invalidate_namespace("missing"), 0);
        assert_eq!(cache.get("sql", "k3"), Some(json!(3)));
    }

    #[test]
    fn test_sweep_removes_expired() {
        let cache = small_cache(10);
        cache.put("responses", "old", json!(1), Some(Duration::ZERO), vec![]);
        cache.put("responses", "live", json!(2), None, vec![]);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get("responses", "live"), Some(json!(2)));
    }

    #[test]
    fn test_policy_rules_pick_ttl_and_tag() {
        let status = QueryCache::policy_for("HX-101の状態を教えて");
        assert_eq!(status.ttl, Some(Duration::from_secs(60)));
        assert_eq!(status.tags, vec!["status".to_string()]);

        let history = QueryCache::policy_for("maintenance history for P-102");
        assert_eq!(history.ttl, Some(Duration::from_secs(1800)));
        assert_eq!(history.tags, vec!["history".to_string()]);

        let unmatched = QueryCache::policy_for("equipment in SYS-001");
        assert_eq!(unmatched.ttl, None);
        assert!(unmatched.tags.is_empty());
    }
}
