//! Resolver facade.
//!
//! [`TenantResolver`] is the single entry point the rest of the system uses.
//! It is built once at process start and passed around explicitly.

use crate::backends::{InMemoryBroadcast, InMemoryDistributedCache};
use crate::deadline::bounded;
use crate::fanout::{InvalidationFanout, InvalidationHandler};
use crate::locator::LocatorCache;
use crate::pointer::PointerCache;
use crate::pool::{Lease, TenantPool};
use crate::snapshot::SnapshotCache;
use crate::stats::ResolverStats;
use std::sync::Arc;
use tenantry_core::{
    Broadcast, ConnectionOpener, DistributedCache, ResolverConfig, SubjectDirectory, SubjectId,
    TenancyResult, TenantId, TenantMetadataStore, TenantSnapshot,
};
use tracing::{debug, info, warn};

/// Assembles a [`TenantResolver`] from its collaborators.
///
/// The distributed cache and broadcast bus default to in-process backends,
/// which is correct for a single process only.
pub struct ResolverBuilder<O: ConnectionOpener> {
    config: ResolverConfig,
    opener: Arc<O>,
    store: Arc<dyn TenantMetadataStore>,
    cache: Option<Arc<dyn DistributedCache>>,
    bus: Option<Arc<dyn Broadcast>>,
    directory: Option<Arc<dyn SubjectDirectory>>,
}

impl<O: ConnectionOpener> ResolverBuilder<O> {
    pub fn new(
        config: ResolverConfig,
        opener: Arc<O>,
        store: Arc<dyn TenantMetadataStore>,
    ) -> Self {
        Self {
            config,
            opener,
            store,
            cache: None,
            bus: None,
            directory: None,
        }
    }

    pub fn distributed_cache(mut self, cache: Arc<dyn DistributedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn broadcast(mut self, bus: Arc<dyn Broadcast>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn subject_directory(mut self, directory: Arc<dyn SubjectDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Validate the configuration, wire the components and start listening
    /// for invalidations from other processes.
    pub async fn build(self) -> TenancyResult<TenantResolver<O>> {
        let config = self.config;
        config.validate()?;

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryDistributedCache::new()) as Arc<dyn DistributedCache>);
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(InMemoryBroadcast::new()) as Arc<dyn Broadcast>);

        let locators = Arc::new(
            LocatorCache::new(Arc::clone(&self.store), config.store_timeout)
                .with_ttl(config.locator_ttl),
        );
        let pool = Arc::new(TenantPool::new(
            &config,
            Arc::clone(&self.opener),
            Arc::clone(&locators),
        )?);
        let snapshots = Arc::new(SnapshotCache::new(&config, self.store, Arc::clone(&cache)));
        let pointers = PointerCache::new(&config, cache);

        let fanout = InvalidationFanout::new(
            bus,
            config.invalidation_channel(),
            config.instance_id.clone(),
            config.cache_timeout,
        );
        fanout
            .subscribe(drop_local_state(
                Arc::clone(&pool),
                Arc::clone(&locators),
                Arc::clone(&snapshots),
            ))
            .await;
        fanout.start().await;

        info!(
            instance_id = %config.instance_id,
            pool_capacity = config.pool_capacity,
            idle_ttl_secs = config.idle_ttl.as_secs(),
            channel = %fanout.channel(),
            "Tenant resolver ready"
        );

        Ok(TenantResolver {
            config,
            opener: self.opener,
            pool,
            locators,
            snapshots,
            pointers,
            fanout,
            directory: self.directory,
        })
    }
}

/// Handler applied when a peer process invalidates a tenant.
fn drop_local_state<O: ConnectionOpener>(
    pool: Arc<TenantPool<O>>,
    locators: Arc<LocatorCache>,
    snapshots: Arc<SnapshotCache>,
) -> InvalidationHandler {
    Arc::new(move |tenant_id: &TenantId| {
        pool.invalidate(tenant_id);
        locators.invalidate(tenant_id);
        snapshots.evict_local(tenant_id);
    })
}

/// Maps tenant ids to pooled connections and display snapshots.
pub struct TenantResolver<O: ConnectionOpener> {
    config: ResolverConfig,
    opener: Arc<O>,
    pool: Arc<TenantPool<O>>,
    locators: Arc<LocatorCache>,
    snapshots: Arc<SnapshotCache>,
    pointers: PointerCache,
    fanout: InvalidationFanout,
    directory: Option<Arc<dyn SubjectDirectory>>,
}

impl<O: ConnectionOpener> TenantResolver<O> {
    pub fn builder(
        config: ResolverConfig,
        opener: Arc<O>,
        store: Arc<dyn TenantMetadataStore>,
    ) -> ResolverBuilder<O> {
        ResolverBuilder::new(config, opener, store)
    }

    /// Lease on the tenant's pooled connection.
    pub async fn resolve(&self, tenant_id: &TenantId) -> TenancyResult<Lease<O>> {
        self.pool.resolve(tenant_id).await
    }

    /// Resolve and validate the tenant's connection.
    ///
    /// A connection that fails validation is dropped from the pool so the
    /// next resolve opens a fresh one.
    pub async fn resolve_validated(&self, tenant_id: &TenantId) -> TenancyResult<Lease<O>> {
        let lease = self.pool.resolve(tenant_id).await?;
        let checked = bounded(
            "connection.validate",
            self.config.open_timeout,
            self.opener.validate(lease.connection()),
        )
        .await;
        if let Err(e) = checked {
            warn!(
                tenant_id = %tenant_id,
                lease_id = lease.id(),
                error = %e,
                "Pooled tenant connection failed validation"
            );
            self.pool.invalidate(tenant_id);
            self.locators.invalidate(tenant_id);
            return Err(e);
        }
        Ok(lease)
    }

    /// The tenant's display snapshot, or `None` for an unknown tenant.
    pub async fn snapshot(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantSnapshot>> {
        self.snapshots.get(tenant_id).await
    }

    /// Drop every piece of state held for the tenant, here and in peers.
    ///
    /// Call as the last step of any change to a tenant's locator or display
    /// attributes. Idempotent. Local state is always cleared; an error means
    /// the distributed snapshot entry could not be deleted and may be served
    /// until it expires.
    pub async fn invalidate(&self, tenant_id: &TenantId) -> TenancyResult<()> {
        self.pool.invalidate(tenant_id);
        self.locators.invalidate(tenant_id);
        let cleared = self.snapshots.invalidate(tenant_id).await;
        if let Err(e) = &cleared {
            warn!(tenant_id = %tenant_id, error = %e, "Failed to delete shared tenant snapshot");
        }
        self.fanout.publish(tenant_id).await;
        debug!(tenant_id = %tenant_id, "Invalidated tenant");
        cleared
    }

    /// Tenant the acting subject belongs to.
    pub async fn tenant_for_subject(&self, subject: &SubjectId) -> TenancyResult<Option<TenantId>> {
        self.pointers
            .tenant_for(subject, self.directory.as_deref())
            .await
    }

    pub async fn remember_subject(
        &self,
        subject: &SubjectId,
        tenant_id: &TenantId,
    ) -> TenancyResult<()> {
        self.pointers.remember(subject, tenant_id).await
    }

    /// Clear a subject's pointer after re-assignment or departure.
    pub async fn forget_subject(&self, subject: &SubjectId) -> TenancyResult<()> {
        self.pointers.forget(subject).await
    }

    /// Shut down: close the pool, dispose its connections and stop listening.
    pub async fn dispose_all(&self) {
        self.pool.dispose_all().await;
        self.fanout.shutdown().await;
        info!(instance_id = %self.config.instance_id, "Tenant resolver disposed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn pool(&self) -> &TenantPool<O> {
        &self.pool
    }

    pub fn locators(&self) -> &LocatorCache {
        &self.locators
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            pool: self.pool.stats(),
            pooled_connections: self.pool.len() as u64,
            in_flight: self.pool.in_flight() as u64,
            cached_locators: self.locators.len() as u64,
            snapshots: self.snapshots.stats(),
            fanout: self.fanout.stats(),
        }
    }
}
