//! Collaborator traits.
//!
//! The resolver only ever talks to the outside world through these seams:
//! the metadata store, the connection factory, the shared key-value cache,
//! the broadcast bus and the optional subject directory. Each has an
//! in-memory implementation for tests and single-process deployments.

use crate::{DatabaseLocator, SubjectId, TenancyResult, TenantId, TenantRecord};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

/// Authoritative source of tenant records. Read-mostly.
#[async_trait]
pub trait TenantMetadataStore: Send + Sync {
    /// Look up one tenant. `Ok(None)` means the tenant does not exist.
    async fn find_by_id(&self, tenant_id: &TenantId) -> TenancyResult<Option<TenantRecord>>;
}

/// Factory for tenant connections. Performs no caching of its own.
#[async_trait]
pub trait ConnectionOpener: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    /// Establish and validate a new connection to the tenant's database.
    ///
    /// The tenant id is for attributing failures; the locator alone decides
    /// where to connect.
    async fn open(
        &self,
        tenant_id: &TenantId,
        locator: &DatabaseLocator,
    ) -> TenancyResult<Self::Connection>;

    /// Check that a pooled connection still works.
    async fn validate(&self, _connection: &Self::Connection) -> TenancyResult<()> {
        Ok(())
    }

    /// Release a connection. Called exactly once per opened connection, after
    /// the pool has let go of it and every lease on it has been dropped.
    async fn dispose(&self, connection: Arc<Self::Connection>) -> TenancyResult<()>;
}

/// Shared string key-value cache with per-entry expiry.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> TenancyResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> TenancyResult<()>;

    async fn del(&self, key: &str) -> TenancyResult<()>;
}

/// Stream of raw messages received on a broadcast channel.
///
/// The stream ends when the underlying subscription is lost.
pub type MessageStream = BoxStream<'static, String>;

/// Publish/subscribe bus shared by every process.
#[async_trait]
pub trait Broadcast: Send + Sync {
    async fn publish(&self, channel: &str, message: &str) -> TenancyResult<()>;

    async fn subscribe(&self, channel: &str) -> TenancyResult<MessageStream>;
}

/// Resolves an acting subject to the tenant it belongs to.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn tenant_of(&self, subject: &SubjectId) -> TenancyResult<Option<TenantId>>;
}
