//! Seams between the HTTP layer and what it serves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tenantry_core::{ConnectionOpener, TenancyResult, TenantId, TenantSnapshot};
use tenantry_storage::{ResolverStats, TenantResolver};

/// Outcome of resolving and validating a tenant's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub tenant_id: TenantId,
    /// Process-unique id of the pooled connection.
    pub lease_id: u64,
    /// How long the pooled connection has been open.
    pub age_ms: u64,
    /// Time spent resolving and validating.
    pub latency_ms: u64,
}

/// The tenancy operations routes need, independent of the connection type.
#[async_trait]
pub trait TenantService: Send + Sync + 'static {
    async fn snapshot(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantSnapshot>>;

    async fn check_connection(&self, tenant_id: &TenantId) -> TenancyResult<ConnectionCheck>;

    async fn invalidate(&self, tenant_id: &TenantId) -> TenancyResult<()>;

    fn stats(&self) -> ResolverStats;

    fn is_closed(&self) -> bool;

    fn instance_id(&self) -> &str;

    async fn dispose_all(&self);
}

#[async_trait]
impl<O: ConnectionOpener> TenantService for TenantResolver<O> {
    async fn snapshot(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantSnapshot>> {
        TenantResolver::snapshot(self, tenant_id).await
    }

    async fn check_connection(&self, tenant_id: &TenantId) -> TenancyResult<ConnectionCheck> {
        let started = Instant::now();
        let lease = self.resolve_validated(tenant_id).await?;
        Ok(ConnectionCheck {
            tenant_id: tenant_id.clone(),
            lease_id: lease.id(),
            age_ms: lease.age().as_millis() as u64,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn invalidate(&self, tenant_id: &TenantId) -> TenancyResult<()> {
        TenantResolver::invalidate(self, tenant_id).await
    }

    fn stats(&self) -> ResolverStats {
        TenantResolver::stats(self)
    }

    fn is_closed(&self) -> bool {
        TenantResolver::is_closed(self)
    }

    fn instance_id(&self) -> &str {
        TenantResolver::instance_id(self)
    }

    async fn dispose_all(&self) {
        TenantResolver::dispose_all(self).await
    }
}

/// A dependency whose reachability decides readiness.
#[async_trait]
pub trait DependencyCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<(), String>;
}

#[async_trait]
impl DependencyCheck for crate::db::PgTenantStore {
    fn name(&self) -> &'static str {
        "metadata_store"
    }

    async fn check(&self) -> Result<(), String> {
        self.ping().await
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl DependencyCheck for tenantry_storage::RedisDistributedCache {
    fn name(&self) -> &'static str {
        "distributed_cache"
    }

    async fn check(&self) -> Result<(), String> {
        self.ping().await.map_err(|e| e.to_string())
    }
}
