//! Two-tier cache of tenant display snapshots.
//!
//! Reads go local near-cache, then the distributed cache, then the metadata
//! store, populating both tiers on the way back. Writes never store a new
//! value: they delete both tiers and let the next read repopulate.

use crate::deadline::bounded;
use crate::keys::KeySpace;
use crate::stats::{SnapshotStats, SnapshotStatsSnapshot};
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tenantry_core::{
    DistributedCache, ResolverConfig, TenancyError, TenancyResult, TenantId, TenantMetadataStore,
    TenantSnapshot,
};
use tracing::{debug, warn};

/// Upper bound on near-cache entries; the near-cache is only a hot-path buffer.
const NEAR_CACHE_CAPACITY: u64 = 10_000;

pub struct SnapshotCache {
    store: Arc<dyn TenantMetadataStore>,
    shared: Arc<dyn DistributedCache>,
    near: Option<Cache<TenantId, Arc<TenantSnapshot>>>,
    keys: KeySpace,
    snapshot_ttl: Duration,
    store_timeout: Duration,
    cache_timeout: Duration,
    stats: SnapshotStats,
}

impl SnapshotCache {
    pub fn new(
        config: &ResolverConfig,
        store: Arc<dyn TenantMetadataStore>,
        shared: Arc<dyn DistributedCache>,
    ) -> Self {
        let near = (!config.near_cache_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(NEAR_CACHE_CAPACITY)
                .time_to_live(config.near_cache_ttl)
                .build()
        });

        Self {
            store,
            shared,
            near,
            keys: KeySpace::new(&config.key_prefix),
            snapshot_ttl: config.snapshot_ttl,
            store_timeout: config.store_timeout,
            cache_timeout: config.cache_timeout,
            stats: SnapshotStats::default(),
        }
    }

    /// Current snapshot of the tenant, or `None` if the tenant does not exist.
    ///
    /// A failing distributed cache degrades to a direct store read whose
    /// result is not cached anywhere.
    pub async fn get(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantSnapshot>> {
        if let Some(snapshot) = self.near.as_ref().and_then(|near| near.get(tenant_id)) {
            self.stats.record_near_hit();
            return Ok(Some(snapshot.as_ref().clone()));
        }

        let key = self.keys.snapshot(tenant_id);
        match bounded("cache.get", self.cache_timeout, self.shared.get(&key)).await {
            Ok(Some(payload)) => {
                if let Some(snapshot) = self.decode(tenant_id, &key, &payload) {
                    self.stats.record_shared_hit();
                    self.remember_locally(tenant_id, &snapshot);
                    return Ok(Some(snapshot));
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.record_degraded();
                warn!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "Snapshot cache unavailable; reading metadata store directly"
                );
                return self.load(tenant_id).await;
            }
        }

        let Some(snapshot) = self.load(tenant_id).await? else {
            return Ok(None);
        };

        if let Err(e) = self.put(tenant_id, &snapshot, self.snapshot_ttl).await {
            warn!(tenant_id = %tenant_id, error = %e, "Failed to populate snapshot cache");
        }
        Ok(Some(snapshot))
    }

    /// Store a snapshot in both tiers.
    ///
    /// The local copy is kept even if the distributed write fails.
    pub async fn put(
        &self,
        tenant_id: &TenantId,
        snapshot: &TenantSnapshot,
        ttl: Duration,
    ) -> TenancyResult<()> {
        self.remember_locally(tenant_id, snapshot);
        let payload = snapshot.encode().map_err(TenancyError::cache)?;
        let key = self.keys.snapshot(tenant_id);
        bounded(
            "cache.set",
            self.cache_timeout,
            self.shared.set(&key, &payload, ttl),
        )
        .await
    }

    /// Delete the tenant's snapshot from both tiers.
    ///
    /// The local entry is always dropped; an error means the distributed entry
    /// may survive until its TTL.
    pub async fn invalidate(&self, tenant_id: &TenantId) -> TenancyResult<()> {
        self.evict_local(tenant_id);
        let key = self.keys.snapshot(tenant_id);
        bounded("cache.del", self.cache_timeout, self.shared.del(&key)).await
    }

    /// Drop only the near-cache entry. Used when another process invalidated.
    pub fn evict_local(&self, tenant_id: &TenantId) {
        if let Some(near) = &self.near {
            near.invalidate(tenant_id);
        }
    }

    pub fn stats(&self) -> SnapshotStatsSnapshot {
        self.stats.snapshot()
    }

    async fn load(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantSnapshot>> {
        self.stats.record_store_read();
        let record = bounded(
            "store.find_by_id",
            self.store_timeout,
            self.store.find_by_id(tenant_id),
        )
        .await?;

        match record {
            Some(record) => Ok(Some(TenantSnapshot::from_record(tenant_id, &record))),
            None => {
                self.stats.record_not_found();
                debug!(tenant_id = %tenant_id, "No snapshot: tenant not found");
                Ok(None)
            }
        }
    }

    fn decode(&self, tenant_id: &TenantId, key: &str, payload: &str) -> Option<TenantSnapshot> {
        match TenantSnapshot::decode(payload) {
            Ok(Some(snapshot)) if &snapshot.tenant_id == tenant_id => Some(snapshot),
            Ok(Some(snapshot)) => {
                warn!(
                    key,
                    cached_tenant = %snapshot.tenant_id,
                    "Cached snapshot belongs to another tenant; ignoring"
                );
                None
            }
            Ok(None) => {
                debug!(key, "Cached snapshot has an unknown schema version; ignoring");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Cached snapshot is not decodable; ignoring");
                None
            }
        }
    }

    fn remember_locally(&self, tenant_id: &TenantId, snapshot: &TenantSnapshot) {
        if let Some(near) = &self.near {
            near.insert(tenant_id.clone(), Arc::new(snapshot.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryDistributedCache;
    use tenantry_core::{TenantStatus, SNAPSHOT_SCHEMA_VERSION};
    use tenantry_test_utils::{record, tenant, FlakyCache, InMemoryTenantStore};

    fn store() -> Arc<InMemoryTenantStore> {
        let store = InMemoryTenantStore::new();
        store.insert(tenant("acme"), record("db_acme", "Acme Inc"));
        Arc::new(store)
    }

    fn no_near_cache() -> ResolverConfig {
        ResolverConfig::default().with_near_cache_ttl(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_miss_populates_distributed_cache() {
        let store = store();
        let shared = Arc::new(InMemoryDistributedCache::new());
        let cache = SnapshotCache::new(&no_near_cache(), store.clone(), shared.clone());

        let first = cache.get(&tenant("acme")).await.expect("read").expect("exists");
        assert_eq!(first.name, "Acme Inc");
        assert_eq!(first.status, TenantStatus::Active);
        assert!(shared
            .get("tenantry:tenant:acme:snapshot")
            .await
            .expect("memory cache")
            .is_some());

        let second = cache.get(&tenant("acme")).await.expect("read").expect("exists");
        assert_eq!(first, second);
        assert_eq!(store.lookups(), 1);
        assert_eq!(cache.stats().shared_hits, 1);
    }

    #[tokio::test]
    async fn test_near_cache_serves_repeat_reads() {
        let shared = Arc::new(InMemoryDistributedCache::new());
        let cache = SnapshotCache::new(&ResolverConfig::default(), store(), shared.clone());

        cache.get(&tenant("acme")).await.expect("read");
        shared
            .del("tenantry:tenant:acme:snapshot")
            .await
            .expect("memory cache");
        let again = cache.get(&tenant("acme")).await.expect("read");

        assert!(again.is_some());
        assert_eq!(cache.stats().near_hits, 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_none_and_uncached() {
        let store = store();
        let shared = Arc::new(InMemoryDistributedCache::new());
        let cache = SnapshotCache::new(&ResolverConfig::default(), store.clone(), shared.clone());

        assert_eq!(cache.get(&tenant("ghost")).await.expect("read"), None);
        assert_eq!(cache.get(&tenant("ghost")).await.expect("read"), None);
        assert_eq!(store.lookups(), 2);
        assert!(shared.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_then_read_sees_rename() {
        let store = store();
        let shared = Arc::new(InMemoryDistributedCache::new());
        let cache = SnapshotCache::new(&ResolverConfig::default(), store.clone(), shared);

        let before = cache.get(&tenant("acme")).await.expect("read").expect("exists");
        store.rename(&tenant("acme"), "Acme Corp");
        let stale = cache.get(&tenant("acme")).await.expect("read").expect("exists");
        assert_eq!(stale.name, before.name);

        cache.invalidate(&tenant("acme")).await.expect("invalidate");
        let after = cache.get(&tenant("acme")).await.expect("read").expect("exists");
        assert_eq!(after.name, "Acme Corp");
    }

    #[tokio::test]
    async fn test_unavailable_cache_degrades_to_store() {
        let store = store();
        let shared = Arc::new(FlakyCache::new());
        shared.set_available(false);
        let cache = SnapshotCache::new(&ResolverConfig::default(), store.clone(), shared.clone());

        for _ in 0..2 {
            let snapshot = cache.get(&tenant("acme")).await.expect("degraded read");
            assert_eq!(snapshot.map(|s| s.name), Some("Acme Inc".to_string()));
        }
        assert_eq!(store.lookups(), 2);
        assert_eq!(cache.stats().degraded, 2);

        shared.set_available(true);
        assert!(shared.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_schema_version_is_a_miss() {
        let store = store();
        let shared = Arc::new(InMemoryDistributedCache::new());
        let stale = format!(
            r#"{{"schema_version":{},"tenant_id":"acme","title":"Old"}}"#,
            SNAPSHOT_SCHEMA_VERSION + 1
        );
        shared
            .set("tenantry:tenant:acme:snapshot", &stale, Duration::from_secs(60))
            .await
            .expect("memory cache");
        let cache = SnapshotCache::new(&no_near_cache(), store.clone(), shared.clone());

        let snapshot = cache.get(&tenant("acme")).await.expect("read").expect("exists");
        assert_eq!(snapshot.name, "Acme Inc");
        assert_eq!(store.lookups(), 1);

        let rewritten = shared
            .get("tenantry:tenant:acme:snapshot")
            .await
            .expect("memory cache")
            .expect("repopulated");
        assert_eq!(
            TenantSnapshot::decode(&rewritten).expect("decodes"),
            Some(snapshot)
        );
    }

    #[tokio::test]
    async fn test_distributed_ttl_bounds_staleness() {
        let store = store();
        let config = no_near_cache().with_snapshot_ttl(Duration::from_millis(50));
        let shared = Arc::new(InMemoryDistributedCache::new());
        let cache = SnapshotCache::new(&config, store.clone(), shared);

        cache.get(&tenant("acme")).await.expect("read");
        store.rename(&tenant("acme"), "Acme Corp");
        tokio::time::sleep(Duration::from_millis(80)).await;

        let fresh = cache.get(&tenant("acme")).await.expect("read").expect("exists");
        assert_eq!(fresh.name, "Acme Corp");
        assert_eq!(store.lookups(), 2);
    }
}
