//! Tenant id to database locator lookup.
//!
//! Locators change only through administrative migration, which always ends
//! with an explicit invalidation, so entries are kept until invalidated. An
//! optional TTL can be configured as a backstop.

use crate::deadline::bounded;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenantry_core::{DatabaseLocator, TenancyError, TenancyResult, TenantId, TenantMetadataStore};
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedLocator {
    locator: DatabaseLocator,
    cached_at: Instant,
}

/// Read-through, in-process cache of database locators.
pub struct LocatorCache {
    store: Arc<dyn TenantMetadataStore>,
    entries: DashMap<TenantId, CachedLocator>,
    ttl: Option<Duration>,
    store_timeout: Duration,
}

impl LocatorCache {
    pub fn new(store: Arc<dyn TenantMetadataStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            ttl: None,
            store_timeout,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Return the tenant's locator, reading the store on a miss.
    ///
    /// Unknown tenants fail with [`TenancyError::TenantNotFound`] and leave
    /// nothing cached.
    pub async fn get_locator(&self, tenant_id: &TenantId) -> TenancyResult<DatabaseLocator> {
        if let Some(locator) = self.lookup(tenant_id) {
            return Ok(locator);
        }

        let record = bounded(
            "store.find_by_id",
            self.store_timeout,
            self.store.find_by_id(tenant_id),
        )
        .await?;

        let Some(record) = record else {
            debug!(tenant_id = %tenant_id, "Tenant not found in metadata store");
            return Err(TenancyError::TenantNotFound {
                tenant_id: tenant_id.clone(),
            });
        };

        self.entries.insert(
            tenant_id.clone(),
            CachedLocator {
                locator: record.locator.clone(),
                cached_at: Instant::now(),
            },
        );
        debug!(tenant_id = %tenant_id, locator = %record.locator, "Cached tenant locator");
        Ok(record.locator)
    }

    fn lookup(&self, tenant_id: &TenantId) -> Option<DatabaseLocator> {
        let entry = self.entries.get(tenant_id)?;
        match self.ttl {
            Some(ttl) if entry.cached_at.elapsed() >= ttl => {
                drop(entry);
                self.entries
                    .remove_if(tenant_id, |_, cached| cached.cached_at.elapsed() >= ttl);
                None
            }
            _ => Some(entry.locator.clone()),
        }
    }

    /// Forget the tenant's locator. Returns whether one was cached.
    pub fn invalidate(&self, tenant_id: &TenantId) -> bool {
        self.entries.remove(tenant_id).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_test_utils::{record, tenant, InMemoryTenantStore};

    fn store() -> Arc<InMemoryTenantStore> {
        let store = InMemoryTenantStore::new();
        store.insert(tenant("acme"), record("db_acme", "Acme Inc"));
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_reads_store_once() {
        let store = store();
        let cache = LocatorCache::new(store.clone(), Duration::from_secs(1));

        let first = cache.get_locator(&tenant("acme")).await.expect("found");
        let second = cache.get_locator(&tenant("acme")).await.expect("found");

        assert_eq!(first, second);
        assert_eq!(first.as_str(), "db_acme");
        assert_eq!(store.lookups(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant_not_cached() {
        let store = store();
        let cache = LocatorCache::new(store.clone(), Duration::from_secs(1));

        for _ in 0..2 {
            let err = cache.get_locator(&tenant("ghost")).await.unwrap_err();
            assert!(matches!(err, TenancyError::TenantNotFound { .. }));
        }
        assert!(cache.is_empty());
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_rereads() {
        let store = store();
        let cache = LocatorCache::new(store.clone(), Duration::from_secs(1));
        cache.get_locator(&tenant("acme")).await.expect("found");

        store.insert(tenant("acme"), record("db_acme_v2", "Acme Inc"));
        assert!(cache.invalidate(&tenant("acme")));
        assert!(!cache.invalidate(&tenant("acme")));

        let moved = cache.get_locator(&tenant("acme")).await.expect("found");
        assert_eq!(moved.as_str(), "db_acme_v2");
    }

    #[tokio::test]
    async fn test_ttl_backstop() {
        let store = store();
        let cache = LocatorCache::new(store.clone(), Duration::from_secs(1))
            .with_ttl(Some(Duration::from_millis(20)));
        cache.get_locator(&tenant("acme")).await.expect("found");
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get_locator(&tenant("acme")).await.expect("found");
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_store_timeout() {
        let store = store();
        store.set_delay(Duration::from_millis(200));
        let cache = LocatorCache::new(store, Duration::from_millis(10));
        let err = cache.get_locator(&tenant("acme")).await.unwrap_err();
        assert!(matches!(err, TenancyError::Timeout { .. }));
        assert!(cache.is_empty());
    }
}
