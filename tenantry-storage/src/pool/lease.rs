//! Reference-counted connection leases.
//!
//! A [`Lease`] is what `resolve` hands out. The pool keeps one clone per
//! tenant; callers keep theirs for as long as they use the connection. When
//! the last clone is dropped the connection is passed to
//! [`ConnectionOpener::dispose`] on a tracked background task, so disposal
//! happens exactly once and never while anyone still holds the connection.

use crate::stats::PoolStats;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenantry_core::{ConnectionOpener, DatabaseLocator, TenantId};
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

static NEXT_LEASE_ID: AtomicU64 = AtomicU64::new(1);

/// Owns everything needed to dispose a connection off the caller's thread.
pub(crate) struct Disposer<O: ConnectionOpener> {
    pub(crate) opener: Arc<O>,
    pub(crate) tracker: TaskTracker,
    runtime: Handle,
    stats: Arc<PoolStats>,
}

impl<O: ConnectionOpener> Disposer<O> {
    pub(crate) fn new(opener: Arc<O>, runtime: Handle, stats: Arc<PoolStats>) -> Self {
        Self {
            opener,
            tracker: TaskTracker::new(),
            runtime,
            stats,
        }
    }

    fn dispose(&self, tenant_id: TenantId, lease_id: u64, connection: Arc<O::Connection>) {
        let opener = Arc::clone(&self.opener);
        let stats = Arc::clone(&self.stats);
        self.tracker.spawn_on(
            async move {
                match opener.dispose(connection).await {
                    Ok(()) => {
                        stats.record_disposed();
                        debug!(tenant_id = %tenant_id, lease_id, "Disposed tenant connection");
                    }
                    Err(e) => {
                        stats.record_dispose_failure();
                        warn!(
                            tenant_id = %tenant_id,
                            lease_id,
                            error = %e,
                            "Failed to dispose tenant connection"
                        );
                    }
                }
            },
            &self.runtime,
        );
    }
}

struct LeaseInner<O: ConnectionOpener> {
    id: u64,
    tenant_id: TenantId,
    locator: DatabaseLocator,
    opened_at: Instant,
    connection: Arc<O::Connection>,
    disposer: Arc<Disposer<O>>,
}

impl<O: ConnectionOpener> Drop for LeaseInner<O> {
    fn drop(&mut self) {
        self.disposer.dispose(
            self.tenant_id.clone(),
            self.id,
            Arc::clone(&self.connection),
        );
    }
}

/// Shared handle on a pooled tenant connection.
pub struct Lease<O: ConnectionOpener> {
    inner: Arc<LeaseInner<O>>,
}

impl<O: ConnectionOpener> Lease<O> {
    pub(crate) fn new(
        tenant_id: TenantId,
        locator: DatabaseLocator,
        connection: O::Connection,
        disposer: Arc<Disposer<O>>,
    ) -> Self {
        Self {
            inner: Arc::new(LeaseInner {
                id: NEXT_LEASE_ID.fetch_add(1, Ordering::Relaxed),
                tenant_id,
                locator,
                opened_at: Instant::now(),
                connection: Arc::new(connection),
                disposer,
            }),
        }
    }

    /// Process-unique id of the underlying connection.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.inner.tenant_id
    }

    pub fn locator(&self) -> &DatabaseLocator {
        &self.inner.locator
    }

    pub fn connection(&self) -> &O::Connection {
        &self.inner.connection
    }

    /// Time since the connection was opened.
    pub fn age(&self) -> Duration {
        self.inner.opened_at.elapsed()
    }

    /// True when both leases refer to the same opened connection.
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<O: ConnectionOpener> Clone for Lease<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: ConnectionOpener> Deref for Lease<O> {
    type Target = O::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl<O: ConnectionOpener> fmt::Debug for Lease<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.inner.id)
            .field("tenant_id", &self.inner.tenant_id)
            .field("locator", &self.inner.locator)
            .field("holders", &Arc::strong_count(&self.inner))
            .finish()
    }
}
