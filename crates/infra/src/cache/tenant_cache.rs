use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use devpulse_core::TenantId;
use devpulse_observability::{HitMissCounter, HitMissSnapshot};

/// Build a `{namespace}:{resource}` key, e.g. `pullRequests:web-portal`.
pub fn namespaced_key(namespace: impl core::fmt::Display, resource: &str) -> String {
    format!("{namespace}:{resource}")
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Result of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub entries_removed: usize,
    pub tenants_removed: usize,
}

/// Advisory cache metrics for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub tenants: usize,
    pub entries: usize,
}

/// Two-level map: tenant -> key -> entry.
///
/// The tenant is a mandatory argument of every read and write, so an entry is
/// only ever visible to the tenant that wrote it.
#[derive(Debug, Default)]
pub struct TenantCache {
    inner: RwLock<HashMap<TenantId, HashMap<String, CacheEntry>>>,
    counters: HitMissCounter,
}

impl TenantCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value. Expired entries count as a miss and are deleted.
    pub fn get(&self, tenant_id: TenantId, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        {
            let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            match map.get(&tenant_id).and_then(|t| t.get(key)) {
                Some(entry) if !entry.is_expired(now) => {
                    self.counters.hit();
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.counters.miss();
                    return None;
                }
            }
        }

        // Expired: take the write lock and re-check, a concurrent `set` may have
        // refreshed the entry in between.
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(tenant_entries) = map.get_mut(&tenant_id) else {
            self.counters.miss();
            return None;
        };
        match tenant_entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.counters.hit();
                Some(entry.value.clone())
            }
            Some(_) => {
                tenant_entries.remove(key);
                if tenant_entries.is_empty() {
                    map.remove(&tenant_id);
                }
                self.counters.miss();
                None
            }
            None => {
                self.counters.miss();
                None
            }
        }
    }

    /// Typed read. A value that no longer deserializes is treated as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, tenant_id: TenantId, key: &str) -> Option<T> {
        let value = self.get(tenant_id, key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(tenant = %tenant_id, key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Insert or overwrite.
    pub fn set(&self, tenant_id: TenantId, key: impl Into<String>, value: serde_json::Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.entry(tenant_id).or_default().insert(key.into(), entry);
    }

    pub fn set_as<T: Serialize>(
        &self,
        tenant_id: TenantId,
        key: impl Into<String>,
        value: &T,
        ttl: Duration,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set(tenant_id, key, value, ttl);
        Ok(())
    }

    pub fn remove(&self, tenant_id: TenantId, key: &str) -> bool {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(tenant_entries) = map.get_mut(&tenant_id) else {
            return false;
        };
        let removed = tenant_entries.remove(key).is_some();
        if tenant_entries.is_empty() {
            map.remove(&tenant_id);
        }
        removed
    }

    /// Drop every key of the tenant that starts with `prefix`.
    pub fn invalidate_prefix(&self, tenant_id: TenantId, prefix: &str) -> usize {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(tenant_entries) = map.get_mut(&tenant_id) else {
            return 0;
        };
        let before = tenant_entries.len();
        tenant_entries.retain(|k, _| !k.starts_with(prefix));
        let removed = before - tenant_entries.len();
        if tenant_entries.is_empty() {
            map.remove(&tenant_id);
        }
        removed
    }

    /// Drop every entry of the tenant. Returns how many were dropped.
    pub fn invalidate_tenant(&self, tenant_id: TenantId) -> usize {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(&tenant_id).map_or(0, |t| t.len())
    }

    /// Drop everything and reset the counters.
    pub fn clear_all(&self) -> usize {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let n = map.values().map(HashMap::len).sum();
        map.clear();
        self.counters.reset();
        n
    }

    /// Remove expired entries everywhere, then tenants left empty.
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let mut report = SweepReport::default();
        for tenant_entries in map.values_mut() {
            let before = tenant_entries.len();
            tenant_entries.retain(|_, e| !e.is_expired(now));
            report.entries_removed += before - tenant_entries.len();
        }
        let tenants_before = map.len();
        map.retain(|_, t| !t.is_empty());
        report.tenants_removed = tenants_before - map.len();
        report
    }

    /// Keys currently held for a tenant, expired or not.
    pub fn keys(&self, tenant_id: TenantId) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = map
            .get(&tenant_id)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let HitMissSnapshot {
            hits,
            misses,
            hit_ratio,
        } = self.counters.snapshot();
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            hits,
            misses,
            hit_ratio,
            tenants: map.len(),
            entries: map.values().map(HashMap::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn set_then_get_counts_a_hit() {
        let cache = TenantCache::new();
        let tenant = TenantId::new();

        assert!(cache.get(tenant, "builds:web").is_none());
        cache.set(tenant, "builds:web", json!({"count": 3}), TTL);
        assert_eq!(cache.get(tenant, "builds:web"), Some(json!({"count": 3})));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!((stats.tenants, stats.entries), (1, 1));
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_absent_and_lazily_deleted() {
        let cache = TenantCache::new();
        let tenant = TenantId::new();

        cache.set(tenant, "k", json!(1), Duration::from_secs(5));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(cache.get(tenant, "k").is_none());
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().tenants, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_and_empty_tenants() {
        let cache = TenantCache::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        cache.set(t1, "short", json!(1), Duration::from_secs(1));
        cache.set(t1, "long", json!(2), Duration::from_secs(600));
        cache.set(t2, "short", json!(3), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        let report = cache.sweep();
        assert_eq!(
            report,
            SweepReport {
                entries_removed: 2,
                tenants_removed: 1
            }
        );
        assert_eq!(cache.keys(t1), vec!["long".to_string()]);
        assert!(cache.keys(t2).is_empty());
    }

    #[test]
    fn invalidation_is_scoped() {
        let cache = TenantCache::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        cache.set(t1, namespaced_key("builds", "web"), json!(1), TTL);
        cache.set(t1, namespaced_key("builds", "api"), json!(2), TTL);
        cache.set(t1, namespaced_key("workItems", "web"), json!(3), TTL);
        cache.set(t2, namespaced_key("builds", "web"), json!(4), TTL);

        assert_eq!(cache.invalidate_prefix(t1, "builds:"), 2);
        assert_eq!(cache.keys(t1), vec!["workItems:web".to_string()]);
        assert_eq!(cache.get(t2, "builds:web"), Some(json!(4)));

        assert_eq!(cache.invalidate_tenant(t1), 1);
        assert_eq!(cache.stats().tenants, 1);

        assert_eq!(cache.clear_all(), 1);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn typed_access() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Snapshot {
            total: u32,
        }

        let cache = TenantCache::new();
        let tenant = TenantId::new();
        cache
            .set_as(tenant, "workItems:web", &Snapshot { total: 7 }, TTL)
            .unwrap();

        assert_eq!(
            cache.get_as::<Snapshot>(tenant, "workItems:web"),
            Some(Snapshot { total: 7 })
        );
        assert_eq!(cache.get_as::<Vec<u8>>(tenant, "workItems:web"), None);
        assert!(cache.remove(tenant, "workItems:web"));
        assert!(!cache.remove(tenant, "workItems:web"));
    }

    proptest! {
        /// Property: a key written under one tenant is never visible under another,
        /// whatever keys and values are used.
        #[test]
        fn entries_never_cross_tenants(
            writes in prop::collection::vec(("[a-z]{1,6}(:[a-z]{1,6})?", any::<i64>(), any::<bool>()), 1..32)
        ) {
            let cache = TenantCache::new();
            let t1 = TenantId::new();
            let t2 = TenantId::new();
            let mut expected_t2: HashMap<String, i64> = HashMap::new();

            for (key, value, to_first) in &writes {
                if *to_first {
                    cache.set(t1, key.clone(), json!(value), TTL);
                } else {
                    cache.set(t2, key.clone(), json!(value), TTL);
                    expected_t2.insert(key.clone(), *value);
                }
            }

            for (key, _, _) in &writes {
                let got = cache.get(t2, key);
                match expected_t2.get(key) {
                    Some(v) => prop_assert_eq!(got, Some(json!(v))),
                    None => prop_assert_eq!(got, None),
                }
            }

            cache.invalidate_tenant(t1);
            for (key, value) in &expected_t2 {
                prop_assert_eq!(cache.get(t2, key), Some(json!(value)));
            }
        }
    }
}
