//! TTL caches over the rule and hierarchy stores.
//!
//! Performance aids, never correctness aids: every rule edit must
//! invalidate before the next run observes it, and entries expire on a
//! short TTL regardless. Staleness queries (`latest_modification`) always
//! bypass the cache.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::application::ports::{HierarchyStorePort, RuleStorePort, StoreError};
use crate::domain::{HierarchyNode, Rule};

/// Default TTL for cached store reads.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

struct Entry<V> {
    stored_at: Instant,
    value: V,
}

/// A string-keyed cache with per-entry expiry.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// A live entry, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    /// Store an entry.
    pub fn insert(&self, key: &str, value: V) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            Entry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    /// Drop one entry.
    pub fn invalidate(&self, key: &str) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.remove(key);
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.clear();
    }
}

/// Caching decorator over a rule store, keyed by use case.
pub struct CachedRuleStore<S> {
    inner: S,
    cache: TtlCache<Vec<Rule>>,
}

impl<S> CachedRuleStore<S> {
    /// Wrap a store with a TTL cache.
    #[must_use]
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    /// Writer hook: must be called after any rule edit for the use case.
    pub fn invalidate_use_case(&self, use_case_id: &str) {
        self.cache.invalidate(use_case_id);
    }
}

#[async_trait]
impl<S: RuleStorePort> RuleStorePort for CachedRuleStore<S> {
    async fn find_for_use_case(&self, use_case_id: &str) -> Result<Vec<Rule>, StoreError> {
        if let Some(rules) = self.cache.get(use_case_id) {
            return Ok(rules);
        }
        let rules = self.inner.find_for_use_case(use_case_id).await?;
        self.cache.insert(use_case_id, rules.clone());
        Ok(rules)
    }

    async fn find(&self, use_case_id: &str, node_id: &str) -> Result<Option<Rule>, StoreError> {
        self.inner.find(use_case_id, node_id).await
    }

    async fn latest_modification(
        &self,
        use_case_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        // Never cached: staleness detection depends on fresh edit stamps.
        self.inner.latest_modification(use_case_id).await
    }
}

/// Caching decorator over a hierarchy store, keyed by structure.
pub struct CachedHierarchyStore<S> {
    inner: S,
    cache: TtlCache<Vec<HierarchyNode>>,
}

impl<S> CachedHierarchyStore<S> {
    /// Wrap a store with a TTL cache.
    #[must_use]
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    /// Writer hook: must be called after any structure edit.
    pub fn invalidate_structure(&self, structure_id: &str) {
        self.cache.invalidate(structure_id);
    }
}

#[async_trait]
impl<S: HierarchyStorePort> HierarchyStorePort for CachedHierarchyStore<S> {
    async fn load_nodes(&self, structure_id: &str) -> Result<Vec<HierarchyNode>, StoreError> {
        if let Some(nodes) = self.cache.get(structure_id) {
            return Ok(nodes);
        }
        let nodes = self.inner.load_nodes(structure_id).await?;
        self.cache.insert(structure_id, nodes.clone());
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::domain::{Conjunction, Predicate, RuleBody};

    #[derive(Default)]
    struct CountingRuleStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RuleStorePort for CountingRuleStore {
        async fn find_for_use_case(&self, use_case_id: &str) -> Result<Vec<Rule>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Rule {
                id: "r1".to_string(),
                use_case_id: use_case_id.to_string(),
                node_id: "L1".to_string(),
                measure_name: "daily".to_string(),
                body: RuleBody::Filter {
                    predicate: Predicate {
                        conjunction: Conjunction::And,
                        conditions: vec![],
                    },
                },
                last_modified_at: Utc::now(),
            }])
        }

        async fn find(&self, _: &str, _: &str) -> Result<Option<Rule>, StoreError> {
            Ok(None)
        }

        async fn latest_modification(
            &self,
            _: &str,
        ) -> Result<Option<DateTime<Utc>>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn repeated_reads_hit_the_cache() {
        let store = CachedRuleStore::new(CountingRuleStore::default(), DEFAULT_CACHE_TTL);
        store.find_for_use_case("uc1").await.unwrap();
        store.find_for_use_case("uc1").await.unwrap();
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_forces_a_reload() {
        let store = CachedRuleStore::new(CountingRuleStore::default(), DEFAULT_CACHE_TTL);
        store.find_for_use_case("uc1").await.unwrap();
        store.invalidate_use_case("uc1");
        store.find_for_use_case("uc1").await.unwrap();
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_reload() {
        let store = CachedRuleStore::new(CountingRuleStore::default(), Duration::ZERO);
        store.find_for_use_case("uc1").await.unwrap();
        store.find_for_use_case("uc1").await.unwrap();
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn latest_modification_bypasses_cache() {
        let store = CachedRuleStore::new(CountingRuleStore::default(), DEFAULT_CACHE_TTL);
        store.latest_modification("uc1").await.unwrap();
        store.latest_modification("uc1").await.unwrap();
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn ttl_cache_basics() {
        let cache: TtlCache<u32> = TtlCache::new(DEFAULT_CACHE_TTL);
        assert!(cache.get("k").is_none());
        cache.insert("k", 7);
        assert_eq!(cache.get("k"), Some(7));
        cache.clear();
        assert!(cache.get("k").is_none());
    }
}
