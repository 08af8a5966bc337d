//! Tenant connection pool.
//!
//! Bounded, idle-expiring map of tenant id to [`Lease`]. Hits are answered
//! synchronously from a `moka` cache. Misses go through an in-flight table so
//! that concurrent callers for the same tenant share one creation. Leaving the
//! pool (capacity, idle expiry, invalidation, shutdown) only drops the pool's
//! lease; the connection is disposed once the last caller lets go too.

mod inflight;
mod lease;

pub use lease::Lease;

use crate::deadline::bounded;
use crate::locator::LocatorCache;
use crate::stats::{PoolStats, PoolStatsSnapshot};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use inflight::InFlight;
use lease::Disposer;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tenantry_core::{
    ConfigError, ConnectionOpener, ResolverConfig, TenancyError, TenancyResult, TenantId,
};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct PoolInner<O: ConnectionOpener> {
    cache: Cache<TenantId, Lease<O>>,
    inflight: DashMap<TenantId, InFlight<O>>,
    next_generation: AtomicU64,
    locators: Arc<LocatorCache>,
    disposer: Arc<Disposer<O>>,
    open_timeout: Duration,
    shutdown_timeout: Duration,
    closed: AtomicBool,
    stats: Arc<PoolStats>,
    maintenance: CancellationToken,
}

/// Bounded cache of open tenant connections.
pub struct TenantPool<O: ConnectionOpener> {
    inner: Arc<PoolInner<O>>,
    maintenance_task: Mutex<Option<JoinHandle<()>>>,
}

impl<O: ConnectionOpener> TenantPool<O> {
    /// Build the pool and start its maintenance task.
    ///
    /// Must be called from within a Tokio runtime; disposal and maintenance
    /// tasks are spawned onto it.
    pub fn new(
        config: &ResolverConfig,
        opener: Arc<O>,
        locators: Arc<LocatorCache>,
    ) -> TenancyResult<Self> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::MissingRequired {
            field: "tokio runtime".to_string(),
        })?;
        let stats = Arc::new(PoolStats::default());

        let listener_stats = Arc::clone(&stats);
        let cache = Cache::builder()
            .max_capacity(config.pool_capacity)
            .time_to_idle(config.idle_ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |tenant_id: Arc<TenantId>, lease: Lease<O>, cause| {
                match cause {
                    RemovalCause::Size => listener_stats.record_evicted_capacity(),
                    RemovalCause::Expired => listener_stats.record_evicted_idle(),
                    RemovalCause::Explicit | RemovalCause::Replaced => {
                        listener_stats.record_removed_explicit()
                    }
                }
                debug!(
                    tenant_id = %tenant_id,
                    lease_id = lease.id(),
                    cause = ?cause,
                    "Tenant connection left the pool"
                );
            })
            .build();

        let inner = Arc::new(PoolInner {
            cache,
            inflight: DashMap::new(),
            next_generation: AtomicU64::new(1),
            locators,
            disposer: Arc::new(Disposer::new(opener, runtime.clone(), Arc::clone(&stats))),
            open_timeout: config.open_timeout,
            shutdown_timeout: config.shutdown_timeout,
            closed: AtomicBool::new(false),
            stats,
            maintenance: CancellationToken::new(),
        });

        let task = spawn_maintenance(&inner, config.maintenance_interval, &runtime);

        Ok(Self {
            inner,
            maintenance_task: Mutex::new(Some(task)),
        })
    }

    /// Return a lease on the tenant's connection, creating it if needed.
    ///
    /// A pooled connection is returned without suspending. Otherwise the
    /// caller joins the creation already underway for this tenant, or starts
    /// one. Every caller of one creation receives the same lease or the same
    /// error.
    pub async fn resolve(&self, tenant_id: &TenantId) -> TenancyResult<Lease<O>> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(TenancyError::PoolClosed);
        }

        if let Some(lease) = inner.cache.get(tenant_id) {
            inner.stats.record_hit();
            return Ok(lease);
        }

        let future = match inner.inflight.entry(tenant_id.clone()) {
            Entry::Occupied(entry) => {
                inner.stats.record_joined();
                debug!(
                    tenant_id = %tenant_id,
                    generation = entry.get().generation,
                    waited_ms = entry.get().started_at.elapsed().as_millis() as u64,
                    "Joining in-flight tenant connection creation"
                );
                entry.get().future.clone()
            }
            Entry::Vacant(entry) => {
                // A creator may have pooled its lease between our miss and
                // taking the entry lock.
                if let Some(lease) = inner.cache.get(tenant_id) {
                    inner.stats.record_hit();
                    return Ok(lease);
                }
                inner.stats.record_miss();
                let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let future = PoolInner::create(Arc::downgrade(inner), tenant_id.clone(), generation)
                    .boxed()
                    .shared();
                entry.insert(InFlight {
                    generation,
                    started_at: Instant::now(),
                    future: future.clone(),
                });
                future
            }
        };

        future.await
    }

    /// Drop the tenant's pooled connection and detach any creation underway.
    ///
    /// The next `resolve` builds a fresh connection. Callers already waiting
    /// on a detached creation still receive its result. Never waits on the
    /// creation itself.
    pub fn invalidate(&self, tenant_id: &TenantId) {
        if let Some((_, flight)) = self.inner.inflight.remove(tenant_id) {
            debug!(
                tenant_id = %tenant_id,
                generation = flight.generation,
                "Detached in-flight tenant connection creation"
            );
        }
        self.inner.cache.invalidate(tenant_id);
        self.inner.cache.run_pending_tasks();
    }

    /// Close the pool and release every connection it holds.
    ///
    /// Subsequent `resolve` calls fail with [`TenancyError::PoolClosed`].
    /// Waits up to the configured shutdown timeout for disposals to finish;
    /// leases still held elsewhere are disposed when they are dropped.
    pub async fn dispose_all(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            debug!("Tenant pool already closed");
            return;
        }

        let detached = inner.inflight.len();
        inner.inflight.clear();

        let pooled: Vec<Arc<TenantId>> = inner.cache.iter().map(|(tenant_id, _)| tenant_id).collect();
        for tenant_id in &pooled {
            inner.cache.invalidate(tenant_id.as_ref());
        }
        inner.cache.run_pending_tasks();

        inner.maintenance.cancel();
        if let Some(task) = self.maintenance_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Pool maintenance task ended abnormally");
            }
        }

        let tracker = &inner.disposer.tracker;
        tracker.close();
        match tokio::time::timeout(inner.shutdown_timeout, tracker.wait()).await {
            Ok(()) => info!(
                released = pooled.len(),
                detached,
                "Tenant pool disposed"
            ),
            Err(_) => warn!(
                pending = tracker.len(),
                timeout_ms = inner.shutdown_timeout.as_millis() as u64,
                "Timed out waiting for tenant connections to be disposed"
            ),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// True if a live connection for the tenant is pooled.
    pub fn contains(&self, tenant_id: &TenantId) -> bool {
        self.inner.cache.contains_key(tenant_id)
    }

    /// Number of pooled connections, after flushing pending maintenance.
    pub fn len(&self) -> usize {
        self.inner.cache.run_pending_tasks();
        self.inner.cache.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of creations currently underway.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Apply pending evictions and expiries now.
    pub fn run_maintenance(&self) {
        self.inner.cache.run_pending_tasks();
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl<O: ConnectionOpener> Drop for TenantPool<O> {
    fn drop(&mut self) {
        self.inner.maintenance.cancel();
    }
}

impl<O: ConnectionOpener> PoolInner<O> {
    /// Body of the shared creation future.
    ///
    /// The future is stored in `inflight`, inside the pool itself, so it
    /// holds the pool only weakly. A creation abandoned by every caller
    /// therefore never keeps a dropped pool alive.
    async fn create(
        pool: Weak<Self>,
        tenant_id: TenantId,
        generation: u64,
    ) -> TenancyResult<Lease<O>> {
        let (locators, disposer, stats, open_timeout) = match pool.upgrade() {
            Some(inner) => (
                Arc::clone(&inner.locators),
                Arc::clone(&inner.disposer),
                Arc::clone(&inner.stats),
                inner.open_timeout,
            ),
            None => return Err(TenancyError::PoolClosed),
        };

        let started = Instant::now();
        let opened = open_lease(&tenant_id, &locators, &disposer, &stats, open_timeout).await;

        let Some(inner) = pool.upgrade() else {
            // An opened lease is disposed as it drops here.
            return opened.and(Err(TenancyError::PoolClosed));
        };
        match opened {
            Ok(lease) => {
                debug!(
                    tenant_id = %tenant_id,
                    lease_id = lease.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Opened tenant connection"
                );
                Ok(inner.complete(&tenant_id, generation, lease))
            }
            Err(err) => {
                inner
                    .inflight
                    .remove_if(&tenant_id, |_, flight| flight.generation == generation);
                inner.stats.record_failure();
                warn!(
                    tenant_id = %tenant_id,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tenant connection creation failed"
                );
                Err(err)
            }
        }
    }

    /// Pool a freshly opened lease, unless the creation was superseded.
    ///
    /// The in-flight entry lock is held across the insert so that an
    /// invalidation either detaches us first or removes what we inserted.
    fn complete(&self, tenant_id: &TenantId, generation: u64, lease: Lease<O>) -> Lease<O> {
        let (result, pooled) = match self.inflight.entry(tenant_id.clone()) {
            Entry::Occupied(entry)
                if entry.get().generation == generation
                    && !self.closed.load(Ordering::Acquire) =>
            {
                let existing = self.cache.entry(tenant_id.clone()).or_insert(lease.clone());
                entry.remove();
                if existing.is_fresh() {
                    (lease, true)
                } else {
                    debug!(
                        tenant_id = %tenant_id,
                        lease_id = lease.id(),
                        "Tenant connection lost the insert race; using the pooled one"
                    );
                    (existing.into_value(), false)
                }
            }
            Entry::Occupied(entry) if entry.get().generation == generation => {
                entry.remove();
                self.stats.record_superseded();
                (lease, false)
            }
            _ => {
                self.stats.record_superseded();
                debug!(
                    tenant_id = %tenant_id,
                    lease_id = lease.id(),
                    "Tenant connection creation was superseded; not pooling it"
                );
                (lease, false)
            }
        };

        if pooled {
            self.cache.run_pending_tasks();
        }
        result
    }
}

async fn open_lease<O: ConnectionOpener>(
    tenant_id: &TenantId,
    locators: &LocatorCache,
    disposer: &Arc<Disposer<O>>,
    stats: &PoolStats,
    open_timeout: Duration,
) -> TenancyResult<Lease<O>> {
    let locator = locators.get_locator(tenant_id).await?;
    let connection = bounded(
        "connection.open",
        open_timeout,
        disposer.opener.open(tenant_id, &locator),
    )
    .await?;
    stats.record_opened();
    Ok(Lease::new(
        tenant_id.clone(),
        locator,
        connection,
        Arc::clone(disposer),
    ))
}

fn spawn_maintenance<O: ConnectionOpener>(
    inner: &Arc<PoolInner<O>>,
    interval: Duration,
    runtime: &Handle,
) -> JoinHandle<()> {
    let pool: Weak<PoolInner<O>> = Arc::downgrade(inner);
    let cancel = inner.maintenance.clone();
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(pool) = pool.upgrade() else { break };
                    pool.cache.run_pending_tasks();
                }
            }
        }
        debug!("Tenant pool maintenance stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_test_utils::{eventually, record, tenant, CountingOpener, InMemoryTenantStore};

    fn pool_with(
        config: &ResolverConfig,
        opener: Arc<CountingOpener>,
        store: Arc<InMemoryTenantStore>,
    ) -> TenantPool<CountingOpener> {
        let locators = Arc::new(LocatorCache::new(store, config.store_timeout));
        TenantPool::new(config, opener, locators).expect("runtime available")
    }

    fn store_with(ids: &[&str]) -> Arc<InMemoryTenantStore> {
        let store = InMemoryTenantStore::new();
        for id in ids {
            store.insert(tenant(id), record(&format!("db_{}", id), id));
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_hit_returns_same_lease() {
        let opener = Arc::new(CountingOpener::new());
        let pool = pool_with(&ResolverConfig::default(), opener.clone(), store_with(&["acme"]));

        let first = pool.resolve(&tenant("acme")).await.expect("resolve");
        let second = pool.resolve(&tenant("acme")).await.expect("resolve");

        assert!(first.same_connection(&second));
        assert_eq!(first.locator().as_str(), "db_acme");
        assert_eq!(opener.opened(), 1);
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant_leaves_no_state() {
        let opener = Arc::new(CountingOpener::new());
        let pool = pool_with(&ResolverConfig::default(), opener.clone(), store_with(&[]));

        let err = pool.resolve(&tenant("ghost-tenant")).await.unwrap_err();
        assert!(matches!(err, TenancyError::TenantNotFound { .. }));
        assert!(!pool.contains(&tenant("ghost-tenant")));
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.len(), 0);
        assert_eq!(opener.opened(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_is_not_cached() {
        let opener = Arc::new(CountingOpener::new());
        let pool = pool_with(&ResolverConfig::default(), opener.clone(), store_with(&["acme"]));

        opener.fail_with(Some(TenancyError::ConnectionOpenFailed {
            tenant_id: tenant("acme"),
            reason: "refused".to_string(),
        }));
        let err = pool.resolve(&tenant("acme")).await.unwrap_err();
        assert!(matches!(err, TenancyError::ConnectionOpenFailed { .. }));
        assert_eq!(pool.in_flight(), 0);

        opener.fail_with(None);
        let lease = pool.resolve(&tenant("acme")).await.expect("second attempt opens");
        assert_eq!(lease.tenant_id(), &tenant("acme"));
        assert_eq!(pool.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_open_timeout_clears_in_flight() {
        let config = ResolverConfig::default().with_open_timeout(Duration::from_millis(20));
        let opener = Arc::new(CountingOpener::new().with_delay(Duration::from_millis(500)));
        let pool = pool_with(&config, opener, store_with(&["acme"]));

        let err = pool.resolve(&tenant("acme")).await.unwrap_err();
        assert!(matches!(
            err,
            TenancyError::Timeout { operation: "connection.open", .. }
        ));
        assert_eq!(pool.in_flight(), 0);
        assert!(!pool.contains(&tenant("acme")));
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_connection_and_disposes_old() {
        let opener = Arc::new(CountingOpener::new());
        let pool = pool_with(&ResolverConfig::default(), opener.clone(), store_with(&["acme"]));

        let old = pool.resolve(&tenant("acme")).await.expect("resolve");
        let old_id = old.connection().id;
        pool.invalidate(&tenant("acme"));

        let fresh = pool.resolve(&tenant("acme")).await.expect("resolve");
        assert!(!fresh.same_connection(&old));
        assert_eq!(opener.opened(), 2);

        // The caller still holds the old lease, so it must not be disposed yet.
        assert_eq!(opener.disposed(), 0);
        drop(old);
        assert!(eventually(Duration::from_secs(2), || opener.disposed_ids() == vec![old_id]).await);
    }

    #[tokio::test]
    async fn test_invalidate_without_state_is_noop() {
        let opener = Arc::new(CountingOpener::new());
        let pool = pool_with(&ResolverConfig::default(), opener.clone(), store_with(&[]));
        pool.invalidate(&tenant("nobody"));
        pool.invalidate(&tenant("nobody"));
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn test_superseded_creation_is_returned_but_not_pooled() {
        let opener = Arc::new(CountingOpener::new().with_delay(Duration::from_millis(100)));
        let pool = Arc::new(pool_with(
            &ResolverConfig::default(),
            opener.clone(),
            store_with(&["acme"]),
        ));

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.resolve(&tenant("acme")).await })
        };
        assert!(eventually(Duration::from_secs(1), || pool.in_flight() == 1).await);
        pool.invalidate(&tenant("acme"));
        assert_eq!(pool.in_flight(), 0);

        let detached = waiter.await.expect("join").expect("creation still succeeds");
        assert!(!pool.contains(&tenant("acme")));
        assert_eq!(pool.stats().superseded, 1);

        let fresh = pool.resolve(&tenant("acme")).await.expect("resolve");
        assert!(!fresh.same_connection(&detached));
        assert_eq!(opener.opened(), 2);
    }

    #[tokio::test]
    async fn test_dispose_all_closes_and_releases() {
        let opener = Arc::new(CountingOpener::new());
        let pool = pool_with(
            &ResolverConfig::default(),
            opener.clone(),
            store_with(&["a", "b"]),
        );
        drop(pool.resolve(&tenant("a")).await.expect("resolve"));
        drop(pool.resolve(&tenant("b")).await.expect("resolve"));

        pool.dispose_all().await;

        assert!(pool.is_closed());
        assert_eq!(opener.disposed(), 2);
        let err = pool.resolve(&tenant("a")).await.unwrap_err();
        assert_eq!(err, TenancyError::PoolClosed);

        // Second call is a no-op.
        pool.dispose_all().await;
        assert_eq!(opener.disposed(), 2);
    }

    #[tokio::test]
    async fn test_idle_expiry_disposes_without_traffic() {
        let config = ResolverConfig::default()
            .with_idle_ttl(Duration::from_millis(50))
            .with_maintenance_interval(Duration::from_millis(10));
        let opener = Arc::new(CountingOpener::new());
        let pool = pool_with(&config, opener.clone(), store_with(&["acme"]));

        drop(pool.resolve(&tenant("acme")).await.expect("resolve"));
        assert!(eventually(Duration::from_secs(3), || opener.disposed() == 1).await);
        assert!(!pool.contains(&tenant("acme")));
        assert_eq!(pool.stats().evicted_idle, 1);
    }

    #[tokio::test]
    async fn test_locator_change_needs_invalidation() {
        let opener = Arc::new(CountingOpener::new());
        let store = store_with(&["acme"]);
        let config = ResolverConfig::default();
        let locators = Arc::new(LocatorCache::new(store.clone(), config.store_timeout));
        let pool = TenantPool::new(&config, opener, Arc::clone(&locators)).expect("runtime");

        let first = pool.resolve(&tenant("acme")).await.expect("resolve");
        store.insert(tenant("acme"), record("db_moved", "Acme"));

        pool.invalidate(&tenant("acme"));
        locators.invalidate(&tenant("acme"));
        let moved = pool.resolve(&tenant("acme")).await.expect("resolve");
        assert_eq!(first.locator().as_str(), "db_acme");
        assert_eq!(moved.locator().as_str(), "db_moved");
    }

    #[tokio::test]
    async fn test_abandoned_creation_does_not_keep_pool_alive() {
        let opener = Arc::new(CountingOpener::new().with_delay(Duration::from_secs(30)));
        let pool = pool_with(&ResolverConfig::default(), opener.clone(), store_with(&["acme"]));

        let abandoned = tokio::time::timeout(Duration::from_millis(20), pool.resolve(&tenant("acme"))).await;
        assert!(abandoned.is_err());
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(opener.opened(), 1);

        let inner = Arc::downgrade(&pool.inner);
        drop(pool);
        assert!(inner.upgrade().is_none());
    }
}
