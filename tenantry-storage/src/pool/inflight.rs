//! In-flight creation bookkeeping.

use super::Lease;
use futures_util::future::{BoxFuture, Shared};
use std::time::Instant;
use tenantry_core::{ConnectionOpener, TenancyResult};

/// The shared result every concurrent caller for one tenant awaits.
pub(crate) type CreationFuture<O> = Shared<BoxFuture<'static, TenancyResult<Lease<O>>>>;

/// A creation underway for one tenant.
///
/// `generation` identifies the creation. Invalidation detaches the entry from
/// the table; a creator that no longer finds its own generation there has
/// been superseded and must not pool its connection.
pub(crate) struct InFlight<O: ConnectionOpener> {
    pub(crate) generation: u64,
    pub(crate) started_at: Instant,
    pub(crate) future: CreationFuture<O>,
}
